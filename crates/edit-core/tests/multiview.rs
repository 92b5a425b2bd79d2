use std::cell::RefCell;
use std::rc::Rc;

use edit_core::{BufferObserver, CommandEngine, MemIo, NullRunner, ObservableBuffer, View};

fn chars(s: &str) -> Vec<char> {
    s.chars().collect()
}

#[test]
fn test_two_views_track_the_same_buffer() {
    let mut buffer = ObservableBuffer::with_text("/m/shared.txt", "hello world");
    let a = Rc::new(RefCell::new(View::new()));
    let b = Rc::new(RefCell::new(View::new()));
    buffer.add_observer(a.clone());
    buffer.add_observer(b.clone());

    a.borrow_mut().set_dot(0, 5); // "hello"
    b.borrow_mut().set_dot(6, 11); // "world"

    // An edit before both selections shifts both.
    buffer.insert_at(0, &chars(">> "));
    assert_eq!(a.borrow().dot(), (3, 8));
    assert_eq!(b.borrow().dot(), (9, 14));

    // Deleting across one selection clips it, and shifts the other.
    buffer.delete_at(1, 4);
    assert_eq!(a.borrow().dot(), (1, 5));
    assert_eq!(b.borrow().dot(), (6, 11));
}

#[test]
fn test_view_dot_survives_undo_cycle() {
    let mut buffer = ObservableBuffer::with_text("/m/f.txt", "abcdef");
    let v = Rc::new(RefCell::new(View::new()));
    buffer.add_observer(v.clone());
    v.borrow_mut().set_dot(4, 6);

    buffer.mark(1);
    buffer.insert_at(0, &chars("XY"));
    buffer.commit();
    assert_eq!(v.borrow().dot(), (6, 8));

    buffer.undo(true);
    assert_eq!(v.borrow().dot(), (4, 6));
}

#[test]
fn test_observer_size_accounting_matches_buffer() {
    struct Counter {
        size: isize,
    }
    impl BufferObserver for Counter {
        fn inserted(&mut self, _q0: usize, runes: &[char]) {
            self.size += runes.len() as isize;
        }
        fn deleted(&mut self, q0: usize, q1: usize) {
            self.size -= (q1 - q0) as isize;
        }
    }

    let mut e = CommandEngine::new(Box::new(MemIo::new()), Box::new(NullRunner));
    let id = e.create_buffer("/m/count.txt", "");
    let counter = Rc::new(RefCell::new(Counter { size: 0 }));
    e.buffer(id).borrow_mut().add_observer(counter.clone());

    e.execute("$ a/one two three\\n/").unwrap();
    e.execute(",s/two/2/").unwrap();
    e.execute(",x/ /d").unwrap();
    e.execute("u").unwrap();
    e.execute("u-1").unwrap();

    let buffer = e.buffer(id);
    assert_eq!(
        counter.borrow().size,
        buffer.borrow().size_runes() as isize
    );
}

#[test]
fn test_late_observer_sees_only_later_edits() {
    let mut e = CommandEngine::new(Box::new(MemIo::new()), Box::new(NullRunner));
    let id = e.create_buffer("/m/late.txt", "");
    e.execute("$ a/before/").unwrap();

    let log: Rc<RefCell<Vec<(usize, String)>>> = Rc::new(RefCell::new(Vec::new()));
    struct Tap(Rc<RefCell<Vec<(usize, String)>>>);
    impl BufferObserver for Tap {
        fn inserted(&mut self, q0: usize, runes: &[char]) {
            self.0
                .borrow_mut()
                .push((q0, runes.iter().collect::<String>()));
        }
        fn deleted(&mut self, _q0: usize, _q1: usize) {}
    }
    e.buffer(id)
        .borrow_mut()
        .add_observer(Rc::new(RefCell::new(Tap(log.clone()))));

    e.execute("$ a/ after/").unwrap();
    assert_eq!(log.borrow().as_slice(), [(6, " after".to_string())]);
}
