//! Property-based round-trip laws for the piece-table storage layer.

use edit_core::PieceTable;
use proptest::prelude::*;

/// A committed batch of edits expressed against the state it applies to.
#[derive(Debug, Clone)]
enum Op {
    Insert { at: usize, text: String },
    Delete { at: usize, len: usize },
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0usize..200, "[a-z✓é\\n]{0,8}").prop_map(|(at, text)| Op::Insert { at, text }),
        (0usize..200, 0usize..8).prop_map(|(at, len)| Op::Delete { at, len }),
    ]
}

/// Apply one op, clamping offsets into the current buffer.
fn apply(table: &mut PieceTable, model: &mut Vec<char>, op: &Op) {
    match op {
        Op::Insert { at, text } => {
            let at = *at % (model.len() + 1);
            let byte_off = byte_of(model, at);
            table.insert_bytes(byte_off, at, text.as_bytes(), text.chars().count());
            for (i, c) in text.chars().enumerate() {
                model.insert(at + i, c);
            }
        }
        Op::Delete { at, len } => {
            if model.is_empty() {
                return;
            }
            let at = *at % model.len();
            let len = (*len).min(model.len() - at);
            if len == 0 {
                return;
            }
            let b0 = byte_of(model, at);
            let b1 = byte_of(model, at + len);
            table.delete_bytes(b0, b1 - b0, at, len);
            model.drain(at..at + len);
        }
    }
}

fn byte_of(model: &[char], rune_off: usize) -> usize {
    model[..rune_off].iter().map(|c| c.len_utf8()).sum()
}

proptest! {
    // Undo after commit restores byte-exact contents and rune count; redo
    // restores the post-commit state.
    #[test]
    fn undo_redo_round_trip(initial in "[a-z ✓\\n]{0,40}", ops in prop::collection::vec(op_strategy(), 1..20)) {
        let mut table = PieceTable::new(&initial);
        let mut model: Vec<char> = initial.chars().collect();

        let before_bytes = table.bytes();
        let before_runes = table.len_runes();

        table.mark(1);
        for op in &ops {
            apply(&mut table, &mut model, op);
        }
        let committed = table.commit().is_some();
        let after_bytes = table.bytes();
        let after_runes = table.len_runes();
        prop_assert_eq!(&after_bytes, &model.iter().collect::<String>().into_bytes());

        if committed {
            table.undo().unwrap();
            prop_assert_eq!(table.bytes(), before_bytes);
            prop_assert_eq!(table.len_runes(), before_runes);

            table.redo().unwrap();
            prop_assert_eq!(table.bytes(), after_bytes);
            prop_assert_eq!(table.len_runes(), after_runes);
        }
    }

    // Whatever UTF-8 goes in comes back out as the same scalar sequence.
    #[test]
    fn read_runes_round_trip(text in "\\PC{0,60}") {
        let table = PieceTable::new(&text);
        let mut runes = vec!['\0'; table.len_runes()];
        let got = table.read_runes(0, &mut runes);
        prop_assert_eq!(got, table.len_runes());
        prop_assert_eq!(runes.into_iter().collect::<String>(), text);
    }

    // Repeated undo walks back to the initial contents regardless of the
    // edit history.
    #[test]
    fn undo_to_origin(commits in prop::collection::vec(prop::collection::vec(op_strategy(), 1..5), 1..8)) {
        let mut table = PieceTable::new("seed text\n");
        let mut model: Vec<char> = "seed text\n".chars().collect();
        let origin = table.bytes();

        for (i, ops) in commits.iter().enumerate() {
            table.mark(i as u64 + 1);
            for op in ops {
                apply(&mut table, &mut model, op);
            }
            table.commit();
        }
        while table.undo().is_some() {}
        prop_assert_eq!(table.bytes(), origin);
    }

    // Dirtiness tracks the clean mark through undo.
    #[test]
    fn dirty_tracks_clean_mark(text in "[a-z]{1,10}") {
        let mut table = PieceTable::new("base");
        prop_assert!(!table.dirty());

        table.mark(1);
        table.insert_bytes(0, 0, text.as_bytes(), text.chars().count());
        table.commit();
        prop_assert!(table.dirty());

        table.clean();
        prop_assert!(!table.dirty());

        table.mark(2);
        table.insert_bytes(0, 0, b"x", 1);
        table.commit();
        prop_assert!(table.dirty());

        table.undo().unwrap();
        prop_assert!(!table.dirty());
    }
}
