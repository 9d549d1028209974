use proptest::prelude::*;
use std::collections::HashSet;

use grid_client::Ledger;
use grid_client::mutations::number_to_letters;
use grid_protocol::{CommandKind, Reply, Request, Status};

proptest! {
    #[test]
    fn prompt_fragments_accumulate_into_one_entry(
        fragments in proptest::collection::vec("[a-zA-Z ]{1,12}", 1..8)
    ) {
        let mut ledger = Ledger::new(50);
        let request = Request::new(CommandKind::Prompt, "ask");
        ledger.track(request.clone()).unwrap();

        for fragment in &fragments {
            ledger.reconcile(Reply::answering(&request, Status::Success).with_message(fragment.clone()));
        }

        prop_assert_eq!(ledger.len(), 1);
        let reply = ledger.replies().next().unwrap();
        prop_assert_eq!(reply.message.clone().unwrap_or_default(), fragments.concat());
    }

    #[test]
    fn ledger_never_exceeds_capacity(
        capacity in 1usize..20,
        answered in proptest::collection::vec(any::<bool>(), 0..60)
    ) {
        let mut ledger = Ledger::new(capacity);
        for answer in answered {
            let request = Request::new(CommandKind::Load, "Load grid");
            ledger.track(request.clone()).unwrap();
            if answer {
                ledger.reconcile(Reply::answering(&request, Status::Success));
            }
            prop_assert!(ledger.len() <= capacity);
        }
    }

    #[test]
    fn column_labels_are_uppercase(n in 0usize..100_000) {
        let label = number_to_letters(n);
        prop_assert!(!label.is_empty());
        prop_assert!(label.chars().all(|c| c.is_ascii_uppercase()));
        prop_assert_eq!(label.len() == 1, n < 26);
    }
}

#[test]
fn column_labels_are_distinct() {
    let labels: HashSet<String> = (0..5000).map(number_to_letters).collect();
    assert_eq!(labels.len(), 5000);
    assert_eq!(number_to_letters(0), "A");
    assert_eq!(number_to_letters(25), "Z");
    assert_eq!(number_to_letters(26), "AA");
    assert_eq!(number_to_letters(701), "ZZ");
    assert_eq!(number_to_letters(702), "AAA");
}
