//! Test cases for the LoopbackLink.

use rstest::*;

use labdaemon::{Link, LoopbackLink};

/// Create a loopback link that expects no writes.
#[fixture]
fn emp_lbk() -> LoopbackLink {
    LoopbackLink::new(vec![])
}

/// Ensure `finalize` method passes if an empty loopback link is used.
///
/// This routine calls the finalize method manually, however, it is not necessary to do so as it is
/// implemented in the `Drop` trait for `LoopbackLink`.
#[rstest]
fn finalize_test(mut emp_lbk: LoopbackLink) {
    emp_lbk.finalize();
}

/// Ensure the link panics on drop if expected writes are left.
#[rstest]
#[should_panic]
fn finalize_test_panic() {
    let _ = LoopbackLink::new(vec![vec![0x01]]);
}

#[rstest]
fn write_raw() {
    let mut lbk = LoopbackLink::new(vec![vec![0x01], vec![0x02]]);
    lbk.write_raw(&[0x01]).unwrap();
    lbk.write_raw(&[0x02]).unwrap();
}

#[rstest]
#[should_panic]
fn write_raw_mismatch() {
    let mut lbk = LoopbackLink::new(vec![vec![0x01]]);
    let _ = lbk.write_raw(&[0x03]);
}

#[rstest]
#[should_panic]
fn write_raw_unexpected(mut emp_lbk: LoopbackLink) {
    let _ = emp_lbk.write_raw(&[0x03]);
}

#[rstest]
#[case("\n")]
#[case("\r\n")]
fn sendcmd_terminator(#[case] term: &str) {
    let mut lbk = LoopbackLink::new(vec![]);
    lbk.set_terminator(term);
    lbk.expect_cmd("++addr 5");
    assert_eq!(lbk.get_terminator(), term);
    lbk.sendcmd("++addr 5").unwrap();
}

#[rstest]
fn binary_length_and_clear(mut emp_lbk: LoopbackLink) {
    assert_eq!(emp_lbk.binary_length(), None);
    emp_lbk.set_binary_length(64);
    emp_lbk.clear_buffer();
    emp_lbk.clear_buffer();
    assert_eq!(emp_lbk.binary_length(), Some(64));
    assert_eq!(emp_lbk.clear_count(), 2);
}
