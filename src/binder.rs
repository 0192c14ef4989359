use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

use tracing::{debug, trace};

use crate::model::{ReactiveModel, Subscription};

/// Why an update pass runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    /// The initial pass at bind time.
    Mount,
    /// The named model key changed.
    Change(String),
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Mount => f.write_str("mount"),
            Trigger::Change(key) => write!(f, "change:{key}"),
        }
    }
}

type UpdateFn = RefCell<Box<dyn FnMut(&Trigger)>>;

/// Runs an update pass once at bind time and once per change notification
/// of any bound key, until torn down.
///
/// Passes never overlap: a notification arriving while a pass runs is
/// queued and handled right after it. Each notification gets its own pass.
pub struct ReactiveBinder {
    subscriptions: Vec<Subscription>,
    bound: Rc<Cell<bool>>,
}

impl ReactiveBinder {
    pub fn bind<M: ReactiveModel>(
        model: &M,
        keys: &[&str],
        on_update: impl FnMut(&Trigger) + 'static,
    ) -> Self {
        let on_update: Box<dyn FnMut(&Trigger)> = Box::new(on_update);
        let update: Rc<UpdateFn> = Rc::new(RefCell::new(on_update));
        let running = Rc::new(Cell::new(false));
        let queue = Rc::new(RefCell::new(VecDeque::new()));
        let bound = Rc::new(Cell::new(true));

        let run = {
            let (update, running, queue, bound) =
                (update.clone(), running.clone(), queue.clone(), bound.clone());
            Rc::new(move |trigger: Trigger| {
                queue.borrow_mut().push_back(trigger);
                if running.replace(true) {
                    trace!("update pass queued");
                    return;
                }
                loop {
                    let Some(trigger) = queue.borrow_mut().pop_front() else {
                        break;
                    };
                    if !bound.get() {
                        queue.borrow_mut().clear();
                        break;
                    }
                    debug!(%trigger, "update pass");
                    (*update.borrow_mut())(&trigger);
                }
                running.set(false);
            })
        };

        let subscriptions = keys
            .iter()
            .map(|key| {
                let run = run.clone();
                let key = key.to_string();
                model.subscribe(&key.clone(), move |_| run(Trigger::Change(key.clone())))
            })
            .collect();

        run(Trigger::Mount);

        Self {
            subscriptions,
            bound,
        }
    }

    pub fn is_bound(&self) -> bool {
        self.bound.get()
    }

    /// Unsubscribe from the model. No pass runs after this returns, not even
    /// one already queued.
    pub fn teardown(&mut self) {
        self.bound.set(false);
        self.subscriptions.clear();
    }
}

impl Drop for ReactiveBinder {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl fmt::Debug for ReactiveBinder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReactiveBinder")
            .field("keys", &self.subscriptions.len())
            .field("bound", &self.bound.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Model;
    use serde_json::{Value, json};
    use std::collections::HashMap;

    /// Each key lives in its own store, so a change made while another key
    /// is being announced is delivered at once instead of after it.
    #[derive(Clone, Default)]
    struct PerKeyModel(Rc<RefCell<HashMap<String, Model>>>);

    impl PerKeyModel {
        fn store(&self, key: &str) -> Model {
            self.0.borrow_mut().entry(key.to_string()).or_default().clone()
        }

        fn set(&self, key: &str, value: impl Into<Value>) {
            self.store(key).set(key, value);
        }
    }

    impl ReactiveModel for PerKeyModel {
        fn get(&self, key: &str) -> Option<Value> {
            self.store(key).get(key)
        }

        fn subscribe(&self, key: &str, listener: impl Fn(&str) + 'static) -> Subscription {
            self.store(key).subscribe(key, listener)
        }
    }

    fn log() -> (Rc<RefCell<Vec<Trigger>>>, impl FnMut(&Trigger) + 'static) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = log.clone();
        (log, move |t: &Trigger| sink.borrow_mut().push(t.clone()))
    }

    #[test]
    fn binding_runs_once_immediately() {
        let model = Model::new();
        let (log, f) = log();
        let _binder = ReactiveBinder::bind(&model, &["data"], f);
        assert_eq!(*log.borrow(), vec![Trigger::Mount]);
    }

    #[test]
    fn every_notification_is_a_full_pass() {
        let model = Model::new();
        let (log, f) = log();
        let _binder = ReactiveBinder::bind(&model, &["data"], f);
        model.set("data", json!({"1": 1}));
        model.set("data", json!({"1": 2}));
        model.set("data", json!({"1": 3}));
        assert_eq!(log.borrow().len(), 4);
        assert_eq!(log.borrow()[3], Trigger::Change("data".to_string()));
    }

    #[test]
    fn multiple_keys_are_bound() {
        let model = Model::new();
        let (log, f) = log();
        let _binder = ReactiveBinder::bind(&model, &["areas", "points"], f);
        model.set("points", json!([]));
        model.set("areas", json!({}));
        assert_eq!(
            *log.borrow(),
            vec![
                Trigger::Mount,
                Trigger::Change("points".to_string()),
                Trigger::Change("areas".to_string()),
            ]
        );
    }

    #[test]
    fn teardown_stops_updates() {
        let model = Model::new();
        let (log, f) = log();
        let mut binder = ReactiveBinder::bind(&model, &["data"], f);
        binder.teardown();
        assert!(!binder.is_bound());
        assert_eq!(model.listener_count(), 0);
        model.set("data", 1);
        assert_eq!(log.borrow().len(), 1);
    }

    #[test]
    fn dropping_the_binder_unsubscribes() {
        let model = Model::new();
        let (log, f) = log();
        drop(ReactiveBinder::bind(&model, &["data"], f));
        model.set("data", 1);
        assert_eq!(log.borrow().len(), 1);
    }

    #[test]
    fn change_during_a_pass_runs_after_it() {
        let model = Model::new();
        let events = Rc::new(RefCell::new(Vec::new()));
        let (m, e) = (model.clone(), events.clone());
        let _binder = ReactiveBinder::bind(&model, &["a", "b"], move |t| {
            e.borrow_mut().push(format!("start {t}"));
            if *t == Trigger::Change("a".to_string()) {
                m.set("b", 1);
            }
            e.borrow_mut().push(format!("end {t}"));
        });
        model.set("a", 1);
        assert_eq!(
            *events.borrow(),
            vec![
                "start mount",
                "end mount",
                "start change:a",
                "end change:a",
                "start change:b",
                "end change:b",
            ]
        );
    }

    #[test]
    fn teardown_inside_a_pass_discards_queued_passes() {
        let model = PerKeyModel::default();
        let slot: Rc<RefCell<Option<ReactiveBinder>>> = Rc::default();
        let (log, mut record) = log();
        let (m, s) = (model.clone(), slot.clone());
        let binder = ReactiveBinder::bind(&model, &["a", "b"], move |t| {
            record(t);
            if *t == Trigger::Change("a".to_string()) {
                m.set("b", 1);
                if let Some(mut binder) = s.borrow_mut().take() {
                    binder.teardown();
                }
            }
        });
        *slot.borrow_mut() = Some(binder);

        model.set("a", 1);
        assert_eq!(
            *log.borrow(),
            vec![Trigger::Mount, Trigger::Change("a".to_string())]
        );
        model.set("b", 2);
        assert_eq!(log.borrow().len(), 2);
    }
}
