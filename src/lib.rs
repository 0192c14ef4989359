pub mod binder;
pub mod catalog;
pub mod color;
pub mod config;
pub mod feature;
pub mod legend;
pub mod model;
pub mod projection;
pub mod render;
pub mod scale;
pub mod surface;
pub mod values;
pub mod widget;
