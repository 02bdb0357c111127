//! Ordering and delivery properties of the command queue and sync primitives.

use carbio_worker::sync::{BlockingQueue, triple_buffer};
use carbio_worker::{CommandKind, Priority, PriorityCommandQueue, SensorAction, SensorCommand};
use proptest::prelude::*;

fn priority() -> impl Strategy<Value = Priority> {
    prop_oneof![Just(Priority::Low), Just(Priority::High), Just(Priority::Critical)]
}

fn kind() -> impl Strategy<Value = CommandKind> {
    prop_oneof![
        Just(CommandKind::None),
        Just(CommandKind::AdminPoll),
        Just(CommandKind::OperationalPoll)
    ]
}

/// Commands tagged with their submission index in the `QueryTemplate` slot.
fn commands() -> impl Strategy<Value = Vec<SensorCommand>> {
    prop::collection::vec((priority(), kind()), 0..64).prop_map(|specs| {
        specs
            .into_iter()
            .enumerate()
            .map(|(i, (p, k))| SensorCommand::new(p, k, SensorAction::QueryTemplate(i as u16)))
            .collect()
    })
}

fn submission_index(command: &SensorCommand) -> u16 {
    match command.action {
        SensorAction::QueryTemplate(i) => i,
        other => panic!("unexpected action {other}"),
    }
}

proptest! {
    #[test]
    fn prop_pop_order_is_priority_then_kind_then_fifo(batch in commands()) {
        let queue = PriorityCommandQueue::new();
        for command in &batch {
            queue.push(*command);
        }

        let mut popped = Vec::new();
        while let Some(command) = queue.try_pop() {
            popped.push(command);
        }
        prop_assert_eq!(popped.len(), batch.len());

        for pair in popped.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            prop_assert!((a.priority, a.kind) >= (b.priority, b.kind));
            if (a.priority, a.kind) == (b.priority, b.kind) {
                prop_assert!(submission_index(a) < submission_index(b));
            }
        }
    }

    #[test]
    fn prop_clear_type_removes_exactly_that_kind(batch in commands(), target in kind()) {
        let queue = PriorityCommandQueue::new();
        for command in &batch {
            queue.push(*command);
        }
        let expected = batch.iter().filter(|c| c.kind == target).count();

        prop_assert_eq!(queue.clear_type(target), expected);
        prop_assert_eq!(queue.len(), batch.len() - expected);
        prop_assert!(!queue.contains(|c| c.kind == target));
    }

    #[test]
    fn prop_triple_buffer_yields_latest(values in prop::collection::vec(any::<u32>(), 1..32)) {
        let (mut writer, mut reader) = triple_buffer();
        for value in &values {
            writer.push(*value);
        }
        prop_assert_eq!(reader.try_pop(), values.last().copied());
        prop_assert!(reader.is_empty());
    }

    #[test]
    fn prop_blocking_queue_keeps_every_value_in_order(values in prop::collection::vec(any::<u8>(), 0..64)) {
        let queue = BlockingQueue::new();
        for value in &values {
            queue.push(*value);
        }
        let drained: Vec<u8> = std::iter::from_fn(|| queue.try_pop()).collect();
        prop_assert_eq!(drained, values);
    }
}

#[test]
fn test_triple_buffer_across_threads() {
    let (mut writer, mut reader) = triple_buffer::<u64>();
    let producer = std::thread::spawn(move || {
        for i in 1..=10_000u64 {
            writer.push(i);
        }
    });

    let mut last = 0;
    while last < 10_000 {
        if let Some(value) = reader.try_pop() {
            assert!(value > last, "values never go backwards");
            last = value;
        }
    }
    producer.join().unwrap();
}
