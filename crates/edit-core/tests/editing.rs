use edit_core::{CommandEngine, EditError, MemIo, NullRunner};

fn engine() -> CommandEngine {
    CommandEngine::new(Box::new(MemIo::new()), Box::new(NullRunner))
}

fn engine_with(text: &str) -> (CommandEngine, usize) {
    let mut e = engine();
    let id = e.create_buffer("/tmp/edit", text);
    (e, id)
}

#[test]
fn test_substitute_whole_buffer() {
    let (mut e, id) = engine_with("All work makes John a dull boy");
    e.execute(",s/John/Jack/").unwrap();
    assert_eq!(e.text(id), "All work makes Jack a dull boy");
}

#[test]
fn test_substitute_first_match_only_without_g() {
    let (mut e, id) = engine_with("x x x");
    e.execute(",s/x/y/").unwrap();
    assert_eq!(e.text(id), "y x x");
}

#[test]
fn test_substitute_global_flag() {
    let (mut e, id) = engine_with("x x x");
    e.execute(",s/x/y/g").unwrap();
    assert_eq!(e.text(id), "y y y");
}

#[test]
fn test_substitute_nth_match() {
    let (mut e, id) = engine_with("x x x");
    e.execute(",s2/x/y/").unwrap();
    assert_eq!(e.text(id), "x y x");
}

#[test]
fn test_substitute_nth_onward_with_g() {
    let (mut e, id) = engine_with("x x x");
    e.execute(",s2/x/y/g").unwrap();
    assert_eq!(e.text(id), "x y y");
}

#[test]
fn test_substitute_whole_match_reference() {
    let (mut e, id) = engine_with("ab cd");
    e.execute(",s/ab/<&>/").unwrap();
    assert_eq!(e.text(id), "<ab> cd");
}

#[test]
fn test_substitute_capture_groups() {
    let (mut e, id) = engine_with("2024-11");
    e.execute(r",s/(\d+)-(\d+)/\2\/\1/").unwrap();
    assert_eq!(e.text(id), "11/2024");
}

#[test]
fn test_substitute_identity_capture() {
    let (mut e, id) = engine_with("keep this line");
    e.execute(r",s/(.*)/\1/").unwrap();
    assert_eq!(e.text(id), "keep this line");
}

#[test]
fn test_substitute_caret_inserts_once_per_line() {
    let (mut e, id) = engine_with("a\nb\nc\n");
    e.execute(",s/^/> /g").unwrap();
    assert_eq!(e.text(id), "> a\n> b\n> c\n");
}

#[test]
fn test_substitute_reports_no_substitution() {
    let (mut e, _) = engine_with("hello");
    let err = e.execute(",s/missing/x/").unwrap_err();
    assert!(matches!(err, EditError::NoSubstitution));
}

#[test]
fn test_failed_command_leaves_buffer_untouched() {
    let (mut e, id) = engine_with("a\nb\n");
    // The first substitution is fine, but the command fails as a whole, so
    // nothing applies.
    let err = e.execute("{ ,s/a/A/\n ,s/zzz/x/ }").unwrap_err();
    assert!(matches!(err, EditError::NoSubstitution));
    assert_eq!(e.text(id), "a\nb\n");
}

#[test]
fn test_append_insert_change_delete() {
    let (mut e, id) = engine_with("bcd");
    e.execute("0 i/a/").unwrap();
    assert_eq!(e.text(id), "abcd");
    e.execute("$ a/e/").unwrap();
    assert_eq!(e.text(id), "abcde");
    e.execute("#1,#4 c/XYZ/").unwrap();
    assert_eq!(e.text(id), "aXYZe");
    e.execute("#1,#4 d").unwrap();
    assert_eq!(e.text(id), "ae");
}

#[test]
fn test_append_block_form() {
    let (mut e, id) = engine_with("tail");
    e.execute("0 i\none\ntwo\n.\n").unwrap();
    assert_eq!(e.text(id), "one\ntwo\ntail");
}

#[test]
fn test_loop_appends_per_line() {
    let (mut e, id) = engine_with("a\nb\nc\n");
    e.execute(",x/.*/{ a/!/ }").unwrap();
    assert_eq!(e.text(id), "a!\nb!\nc!\n");
    assert_eq!(e.buffer(id).borrow().size_runes(), 9);
}

#[test]
fn test_loop_without_pattern_iterates_lines() {
    let (mut e, id) = engine_with("one\ntwo\nthree\n");
    e.execute(",x s/e/E/").unwrap();
    assert_eq!(e.text(id), "onE\ntwo\nthrEe\n");
}

#[test]
fn test_loop_preserves_empty_lines() {
    let (mut e, id) = engine_with("a\n\nb\n");
    e.execute(",x/.*/ a/./").unwrap();
    assert_eq!(e.text(id), "a.\n.\nb.\n");
}

#[test]
fn test_loop_deletes_matches() {
    let (mut e, id) = engine_with("one, two, three");
    e.execute(",x/, /d").unwrap();
    assert_eq!(e.text(id), "onetwothree");
}

#[test]
fn test_y_loop_edits_between_matches() {
    let (mut e, id) = engine_with("a-b-c");
    e.execute(",y/-/ c/X/").unwrap();
    assert_eq!(e.text(id), "X-X-X");
}

#[test]
fn test_guard_runs_on_match() {
    let (mut e, id) = engine_with("one\ntwo\nthree\n");
    e.execute(",x/.*/ g/t/ a/!/").unwrap();
    assert_eq!(e.text(id), "one\ntwo!\nthree!\n");
}

#[test]
fn test_v_guard_runs_on_no_match() {
    let (mut e, id) = engine_with("one\ntwo\nthree\n");
    e.execute(",x/.*/ v/t/ a/!/").unwrap();
    assert_eq!(e.text(id), "one!\ntwo\nthree\n");
}

#[test]
fn test_move_to_end() {
    let (mut e, id) = engine_with("one\ntwo\nthree\n");
    e.execute("#0,#4 m$").unwrap();
    assert_eq!(e.text(id), "two\nthree\none\n");
}

#[test]
fn test_copy_to_start() {
    let (mut e, id) = engine_with("one\ntwo\n");
    e.execute("2 t0").unwrap();
    assert_eq!(e.text(id), "twoone\ntwo\n");
}

#[test]
fn test_move_onto_itself_is_noop() {
    let (mut e, id) = engine_with("one\ntwo\n");
    e.execute("1 m1").unwrap();
    assert_eq!(e.text(id), "one\ntwo\n");
}

#[test]
fn test_move_overlap_is_rejected() {
    let (mut e, _) = engine_with("abcdef");
    let err = e.execute("#0,#4 m#2").unwrap_err();
    assert!(matches!(err, EditError::MoveOverlaps));
}

#[test]
fn test_brace_block_is_one_step() {
    let (mut e, id) = engine_with("hello world");
    e.execute("{ 0 i/[/\n $ a/]/ }").unwrap();
    assert_eq!(e.text(id), "[hello world]");
    e.execute("u").unwrap();
    assert_eq!(e.text(id), "hello world");
}

#[test]
fn test_print_goes_to_reporter() {
    use std::cell::RefCell;
    use std::rc::Rc;
    let (mut e, _) = engine_with("one\ntwo\nthree\n");
    let lines: Rc<RefCell<Vec<String>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = lines.clone();
    e.set_reporter(move |msg| sink.borrow_mut().push(msg.to_string()));
    e.execute("2 p").unwrap();
    assert_eq!(lines.borrow().as_slice(), ["two"]);
}

#[test]
fn test_bad_regex_is_reported() {
    let (mut e, _) = engine_with("x");
    let err = e.execute(",s/(/y/").unwrap_err();
    assert!(matches!(err, EditError::BadRegex(_)));
}

#[test]
fn test_unicode_substitution() {
    let (mut e, id) = engine_with("痛苦Lorem");
    e.execute(",s/痛苦/只是/").unwrap();
    assert_eq!(e.text(id), "只是Lorem");
    e.execute("u").unwrap();
    assert_eq!(e.text(id), "痛苦Lorem");
}
