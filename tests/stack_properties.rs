//! Property-based tests for disposal stacks

use std::sync::Arc;

use disposable::testing::DisposalLog;
use disposable::{AsyncDisposableStack, Candidate, DisposableStack};
use proptest::prelude::*;

fn names(count: usize) -> Vec<String> {
    (0..count).map(|i| format!("r{}", i)).collect()
}

proptest! {
    #[test]
    fn prop_disposal_is_reverse_of_insertion(count in 0usize..40) {
        let log = DisposalLog::new();
        let stack = DisposableStack::new();
        for name in names(count) {
            stack.use_resource(log.probe(name)).unwrap();
        }

        stack.dispose().unwrap();

        let mut expected = names(count);
        expected.reverse();
        prop_assert_eq!(log.entries(), expected);
    }

    #[test]
    fn prop_repeated_dispose_runs_each_cleanup_once(
        count in 1usize..20,
        extra_calls in 1usize..5
    ) {
        let log = DisposalLog::new();
        let stack = DisposableStack::new();
        let probes: Vec<_> = names(count)
            .into_iter()
            .map(|name| stack.use_resource(log.probe(name)).unwrap())
            .collect();

        for _ in 0..=extra_calls {
            stack.dispose().unwrap();
        }
        drop(stack);

        for probe in &probes {
            prop_assert_eq!(probe.disposals(), 1);
        }
    }

    #[test]
    fn prop_every_failure_is_reported(failing in prop::collection::vec(any::<bool>(), 1..30)) {
        let log = DisposalLog::new();
        let stack = DisposableStack::new();
        for (i, fails) in failing.iter().enumerate() {
            let name = format!("r{}", i);
            let probe = if *fails {
                log.failing_probe(name, "boom")
            } else {
                log.probe(name)
            };
            stack.use_resource(probe).unwrap();
        }

        let expected_failures = failing.iter().filter(|f| **f).count();
        let outcome = stack.dispose();

        // every cleanup ran no matter how many failed
        prop_assert_eq!(log.len(), failing.len());
        match outcome {
            Ok(()) => prop_assert_eq!(expected_failures, 0),
            Err(err) => {
                prop_assert_eq!(err.leaves().len(), expected_failures);
                // a single tracked record is never wrapped
                prop_assert_eq!(err.is_aggregate(), failing.len() > 1);
            }
        }
    }

    #[test]
    fn prop_batch_rollback_disposes_every_tracked_item(
        valid_before in 0usize..15,
        valid_after in 0usize..15
    ) {
        let log = DisposalLog::new();
        let mut items: Vec<Option<String>> = names(valid_before).into_iter().map(Some).collect();
        items.push(None);
        items.extend((0..valid_after).map(|i| Some(format!("after{}", i))));

        let result = DisposableStack::from_resources(items, |item| match item {
            Some(name) => Candidate::dispose(Arc::new(log.probe(name))),
            None => Candidate::inert("an invalid value"),
        });

        prop_assert!(result.is_err());
        // recognition failures do not stop the batch, so later items are
        // tracked too and rolled back with the rest
        prop_assert_eq!(log.len(), valid_before + valid_after);
        let entries = log.entries();
        let mut sorted = entries.clone();
        sorted.sort();
        sorted.dedup();
        prop_assert_eq!(sorted.len(), entries.len());
    }

    #[test]
    fn prop_async_disposal_is_reverse_of_insertion(count in 0usize..30, mixed in any::<bool>()) {
        let log = DisposalLog::new();
        let stack = AsyncDisposableStack::new();
        for (i, name) in names(count).into_iter().enumerate() {
            if mixed && i % 2 == 0 {
                stack.use_resource(log.probe(name)).unwrap();
            } else {
                stack.use_async(log.probe(name)).unwrap();
            }
        }

        futures::executor::block_on(stack.dispose()).unwrap();

        let mut expected = names(count);
        expected.reverse();
        prop_assert_eq!(log.entries(), expected);
    }
}
