//! Property-based тесты брокера.
//!
//! Случайная последовательность publish / subscribe / unsubscribe
//! выполняется на брокере и на простой модели; то, что получил каждый
//! подписчик, должно совпасть с моделью.

use std::collections::{HashMap, VecDeque};

use herald::{Broker, BrokerConfig, ReplayPolicy, Subscription};
use proptest::prelude::*;

const PROPTEST_CASES: u32 = 256;
const TOPICS: [&str; 3] = ["temp", "news", "orders"];

#[derive(Debug, Clone)]
enum Op {
    Publish { topic: usize, content: String },
    Subscribe { topic: usize },
    /// Индекс среди живых подписок (по модулю их количества).
    Unsubscribe { slot: usize },
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0..TOPICS.len(), "[a-z0-9]{0,8}")
            .prop_map(|(topic, content)| Op::Publish { topic, content }),
        2 => (0..TOPICS.len()).prop_map(|topic| Op::Subscribe { topic }),
        1 => any::<usize>().prop_map(|slot| Op::Unsubscribe { slot }),
    ]
}

/// Модель брокера с однократной выдачей истории.
#[derive(Default)]
struct Model {
    replay_capacity: usize,
    history: HashMap<usize, VecDeque<String>>,
    /// Подписки по порядку создания, включая снятые.
    subscribers: Vec<ModelSub>,
}

struct ModelSub {
    topic: usize,
    alive: bool,
    expected: Vec<String>,
}

impl Model {
    fn live_on(
        &self,
        topic: usize,
    ) -> usize {
        self.subscribers
            .iter()
            .filter(|s| s.alive && s.topic == topic)
            .count()
    }

    fn publish(
        &mut self,
        topic: usize,
        content: &str,
    ) {
        if self.live_on(topic) == 0 {
            if self.replay_capacity == 0 {
                return;
            }
            let history = self.history.entry(topic).or_default();
            if history.len() == self.replay_capacity {
                history.pop_front();
            }
            history.push_back(content.to_string());
            return;
        }
        for sub in &mut self.subscribers {
            if sub.alive && sub.topic == topic {
                sub.expected.push(content.to_string());
            }
        }
    }

    fn subscribe(
        &mut self,
        topic: usize,
    ) {
        let replayed = self
            .history
            .remove(&topic)
            .map(Vec::from)
            .unwrap_or_default();
        self.subscribers.push(ModelSub {
            topic,
            alive: true,
            expected: replayed,
        });
    }
}

fn run_ops(
    ops: &[Op],
    replay_capacity: usize,
) -> Result<(), TestCaseError> {
    let replay = if replay_capacity == 0 {
        ReplayPolicy::Disabled
    } else {
        ReplayPolicy::drain_once(replay_capacity)
    };
    let broker = Broker::new(BrokerConfig {
        replay,
        subscriber_queue_capacity: 4096,
    });
    let mut model = Model {
        replay_capacity,
        ..Default::default()
    };
    let mut subs: Vec<Option<Subscription>> = Vec::new();
    let mut received: Vec<Vec<String>> = Vec::new();

    for op in ops {
        match op {
            Op::Publish { topic, content } => {
                broker.publish(TOPICS[*topic], content.clone()).unwrap();
                model.publish(*topic, content);
            }
            Op::Subscribe { topic } => {
                subs.push(Some(broker.subscribe(TOPICS[*topic]).unwrap()));
                received.push(Vec::new());
                model.subscribe(*topic);
            }
            Op::Unsubscribe { slot } => {
                let live: Vec<usize> = (0..subs.len()).filter(|i| subs[*i].is_some()).collect();
                if live.is_empty() {
                    continue;
                }
                let index = live[slot % live.len()];
                if let Some(mut sub) = subs[index].take() {
                    while let Ok(msg) = sub.try_recv() {
                        received[index].push(msg.content_lossy().into_owned());
                    }
                    prop_assert!(sub.unsubscribe().is_removed());
                }
                model.subscribers[index].alive = false;
            }
        }
    }

    for (index, sub) in subs.iter_mut().enumerate() {
        if let Some(sub) = sub {
            let mut last = 0;
            while let Ok(msg) = sub.try_recv() {
                prop_assert!(msg.sequence > last);
                last = msg.sequence;
                received[index].push(msg.content_lossy().into_owned());
            }
        }
    }

    for (index, sub) in model.subscribers.iter().enumerate() {
        prop_assert_eq!(&received[index], &sub.expected, "subscriber #{}", index);
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: PROPTEST_CASES,
        ..ProptestConfig::default()
    })]

    /// Тест проверяет совпадение доставки с моделью при включённом replay.
    #[test]
    fn prop_delivery_matches_model(ops in prop::collection::vec(op_strategy(), 1..80)) {
        run_ops(&ops, 1024)?;
    }

    /// Тест проверяет вытеснение старых сообщений из маленького буфера.
    #[test]
    fn prop_small_history_keeps_newest(ops in prop::collection::vec(op_strategy(), 1..80)) {
        run_ops(&ops, 3)?;
    }

    #[test]
    fn prop_no_replay_drops_unobserved(ops in prop::collection::vec(op_strategy(), 1..80)) {
        run_ops(&ops, 0)?;
    }

    /// Тест проверяет, что номера сообщений строго возрастают.
    #[test]
    fn prop_sequences_strictly_increase(contents in prop::collection::vec("[a-z]{0,4}", 1..50)) {
        let broker = Broker::default();
        let mut last = 0;
        for content in contents {
            let ack = broker.publish("temp", content).unwrap();
            prop_assert!(ack.sequence > last);
            last = ack.sequence;
        }
    }
}
