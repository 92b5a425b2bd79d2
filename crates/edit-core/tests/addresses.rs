use std::cell::RefCell;
use std::rc::Rc;

use edit_core::{CommandEngine, EditError, MemIo, NullRunner};

fn engine_with(text: &str) -> (CommandEngine, usize, Rc<RefCell<Vec<String>>>) {
    let mut e = CommandEngine::new(Box::new(MemIo::new()), Box::new(NullRunner));
    let id = e.create_buffer("/tmp/addr", text);
    let lines: Rc<RefCell<Vec<String>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = lines.clone();
    e.set_reporter(move |msg| sink.borrow_mut().push(msg.to_string()));
    (e, id, lines)
}

#[test]
fn test_line_address_selects_line() {
    let (mut e, id, _) = engine_with("one\ntwo\nthree\n");
    e.execute("2 c/TWO/").unwrap();
    assert_eq!(e.text(id), "one\nTWO\nthree\n");
}

#[test]
fn test_line_address_out_of_range() {
    let (mut e, _, _) = engine_with("one\ntwo\n");
    let err = e.execute("9 p").unwrap_err();
    assert!(matches!(err, EditError::AddressOutOfRange));
}

#[test]
fn test_rune_address_range() {
    let (mut e, id, _) = engine_with("abcdef");
    e.execute("#2,#4 d").unwrap();
    assert_eq!(e.text(id), "abef");
}

#[test]
fn test_rune_address_counts_runes_not_bytes() {
    let (mut e, id, _) = engine_with("痛苦Lorem");
    e.execute("#0,#2 d").unwrap();
    assert_eq!(e.text(id), "Lorem");
    assert_eq!(e.buffer(id).borrow().size_runes(), 5);
}

#[test]
fn test_relative_line_addresses() {
    let (mut e, id, _) = engine_with("one\ntwo\nthree\nfour\n");
    // Dot lands on line 2, then +1 selects line 3.
    e.execute("2").unwrap();
    e.execute(".+1 c/3/").unwrap();
    assert_eq!(e.text(id), "one\ntwo\n3\nfour\n");
    e.execute("4").unwrap();
    e.execute(".-2 c/2/").unwrap();
    assert_eq!(e.text(id), "one\n2\n3\nfour\n");
}

#[test]
fn test_regex_address_searches_forward_from_dot() {
    let (mut e, id, _) = engine_with("ab ab ab");
    e.execute("#3").unwrap();
    e.execute("/ab/ c/XY/").unwrap();
    assert_eq!(e.text(id), "ab XY ab");
}

#[test]
fn test_regex_address_wraps_around_once() {
    let (mut e, id, _) = engine_with("ab cd ef");
    e.execute("#6").unwrap();
    e.execute("/ab/ c/XY/").unwrap();
    assert_eq!(e.text(id), "XY cd ef");
}

#[test]
fn test_regex_address_fails_when_absent() {
    let (mut e, _, _) = engine_with("ab cd");
    let err = e.execute("/zzz/ p").unwrap_err();
    assert!(matches!(err, EditError::NoMatch));
}

#[test]
fn test_reverse_regex_address() {
    let (mut e, id, _) = engine_with("ab ab ab");
    e.execute("$").unwrap();
    e.execute("?ab? c/XY/").unwrap();
    assert_eq!(e.text(id), "ab ab XY");
}

#[test]
fn test_comma_is_whole_buffer_by_default() {
    let (mut e, id, _) = engine_with("one\ntwo\n");
    e.execute(", c/gone\\n/").unwrap();
    assert_eq!(e.text(id), "gone\n");
}

#[test]
fn test_comma_has_identity_zero_dollar() {
    let (mut e, id, _) = engine_with("one\ntwo\n");
    e.execute("0,$ c/gone\\n/").unwrap();
    assert_eq!(e.text(id), "gone\n");
}

#[test]
fn test_semicolon_sets_dot_before_right_side() {
    let (mut e, id, _) = engine_with("ab cd ab");
    // `;` evaluates /cd/ first, sets dot there, then /ab/ searches from it:
    // the selection runs from "cd" through the second "ab".
    e.execute("/cd/;/ab/ d").unwrap();
    assert_eq!(e.text(id), "ab ");
}

#[test]
fn test_addresses_out_of_order() {
    let (mut e, _, _) = engine_with("one\ntwo\nthree\n");
    let err = e.execute("3,1 p").unwrap_err();
    assert!(matches!(err, EditError::AddressOutOfRange));
}

#[test]
fn test_file_address_switches_buffer() {
    let mut e = CommandEngine::new(Box::new(MemIo::new()), Box::new(NullRunner));
    let a = e.create_buffer("/src/alpha.txt", "alpha");
    let b = e.create_buffer("/src/beta.txt", "beta");
    e.execute("\"alpha\" ,c/ALPHA/").unwrap();
    assert_eq!(e.text(a), "ALPHA");
    assert_eq!(e.text(b), "beta");
}

#[test]
fn test_file_address_requires_unique_match() {
    let mut e = CommandEngine::new(Box::new(MemIo::new()), Box::new(NullRunner));
    e.create_buffer("/src/alpha.txt", "");
    e.create_buffer("/src/beta.txt", "");
    let err = e.execute("\"txt\" p").unwrap_err();
    assert!(matches!(err, EditError::MultipleFilesMatch(_)));
    let err = e.execute("\"gamma\" p").unwrap_err();
    assert!(matches!(err, EditError::NoFileMatches(_)));
}

#[test]
fn test_position_report_lines() {
    let (mut e, _, lines) = engine_with("one\ntwo\nthree\n");
    e.execute("2 =").unwrap();
    assert_eq!(lines.borrow().as_slice(), ["/tmp/addr:2"]);
}

#[test]
fn test_position_report_runes() {
    let (mut e, _, lines) = engine_with("one\ntwo\nthree\n");
    e.execute("2 =#").unwrap();
    assert_eq!(lines.borrow().as_slice(), ["/tmp/addr:#4,#7"]);
}

#[test]
fn test_position_report_line_and_rune() {
    let (mut e, _, lines) = engine_with("one\ntwo\nthree\n");
    e.execute("#5 =+").unwrap();
    assert_eq!(lines.borrow().as_slice(), ["/tmp/addr:2+#1"]);
}

#[test]
fn test_position_does_not_mutate() {
    let (mut e, id, _) = engine_with("one\ntwo\n");
    e.execute(", =").unwrap();
    assert_eq!(e.text(id), "one\ntwo\n");
    assert!(!e.buffer(id).borrow().dirty());
}

#[test]
fn test_bare_address_moves_dot() {
    let (mut e, id, _) = engine_with("one\ntwo\nthree\n");
    e.execute("2").unwrap();
    assert_eq!(e.dot(id), (4, 7));
}
