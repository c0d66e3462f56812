use std::cell::RefCell;
use std::collections::VecDeque;
use std::time::Duration;

use dispenser_hardware::error::HwError;
use dispenser_hardware::util::{
    LineBuffer, MAX_LINE_LEN, read_line_with_deadline, write_all_with_deadline,
};

fn chunked(chunks: &[&[u8]]) -> RefCell<VecDeque<Vec<u8>>> {
    RefCell::new(chunks.iter().map(|c| c.to_vec()).collect())
}

#[test]
fn line_split_across_chunks_is_reassembled() {
    let source = chunked(&[b"OK:D", b"P3\r", b"\nPONG\n"]);
    let mut buf = LineBuffer::new();
    let read = |out: &mut [u8]| -> dispenser_hardware::error::Result<usize> {
        let Some(chunk) = source.borrow_mut().pop_front() else {
            return Ok(0);
        };
        out[..chunk.len()].copy_from_slice(&chunk);
        Ok(chunk.len())
    };
    let line = read_line_with_deadline(
        &mut buf,
        read,
        Duration::from_millis(20),
        Duration::from_micros(200),
    )
    .unwrap();
    assert_eq!(line.as_deref(), Some("OK:DP3"));
    // Second line was already buffered.
    assert_eq!(buf.next_line().as_deref(), Some("PONG"));
}

#[test]
fn silence_times_out_with_none() {
    let mut buf = LineBuffer::new();
    let res = read_line_with_deadline(
        &mut buf,
        |_| Ok(0),
        Duration::from_millis(5),
        Duration::from_micros(200),
    )
    .unwrap();
    assert!(res.is_none());
}

#[test]
fn read_error_propagates() {
    let mut buf = LineBuffer::new();
    let err = read_line_with_deadline(
        &mut buf,
        |_| Err(HwError::Closed),
        Duration::from_millis(5),
        Duration::from_micros(200),
    )
    .expect_err("expected closed error");
    match err {
        HwError::Closed => {}
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn blank_lines_are_skipped() {
    let mut buf = LineBuffer::new();
    buf.push(b"\r\n\n  \nHEARTBEAT\n");
    assert_eq!(buf.next_line().as_deref(), Some("HEARTBEAT"));
    assert!(buf.next_line().is_none());
}

#[test]
fn overlong_line_is_dropped_without_losing_neighbours() {
    let mut buf = LineBuffer::new();
    buf.push(b"READY\n");
    buf.push(&vec![b'x'; MAX_LINE_LEN + 10]);
    buf.push(b"tail\nPONG\n");
    assert_eq!(buf.next_line().as_deref(), Some("READY"));
    assert_eq!(buf.next_line().as_deref(), Some("PONG"));
    assert!(buf.next_line().is_none());
}

#[test]
fn partial_writes_are_continued_until_done() {
    let sink = RefCell::new(Vec::new());
    let calls = RefCell::new(0u32);
    write_all_with_deadline(
        b"DP3\n",
        |chunk| {
            // Two bytes per call, with a full queue on every other call.
            let mut c = calls.borrow_mut();
            *c += 1;
            if *c % 2 == 0 {
                return Ok(0);
            }
            let n = chunk.len().min(2);
            sink.borrow_mut().extend_from_slice(&chunk[..n]);
            Ok(n)
        },
        Duration::from_millis(50),
        Duration::from_micros(200),
    )
    .unwrap();
    assert_eq!(sink.into_inner(), b"DP3\n");
}

#[test]
fn stalled_write_times_out() {
    let calls = RefCell::new(0u32);
    let err = write_all_with_deadline(
        b"PING\n",
        |_| {
            *calls.borrow_mut() += 1;
            Ok(0)
        },
        Duration::from_millis(5),
        Duration::from_micros(200),
    )
    .expect_err("a queue that never drains must not block forever");
    assert!(matches!(err, HwError::Timeout));
    assert!(*calls.borrow() >= 1);
}
