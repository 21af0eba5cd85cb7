use tessera::buffer::ReadBuffer;

#[test]
fn test_read_until_frames_and_leaves_cursor_on_miss() {
    let mut reader = ReadBuffer::new(b"ab\0cd");

    let first = reader.read_until(b"\0");
    assert_eq!(first, Some(&b"ab"[..]));
    assert_eq!(reader.read_index(), 3, "cursor advanced past the separator");

    let second = reader.read_until(b"\0");
    assert_eq!(second, None, "no further separator");
    assert_eq!(reader.read_index(), 3, "a miss must not move the cursor");
}

#[test]
fn test_read_until_adjacent_separator_is_empty() {
    let mut reader = ReadBuffer::new(b"\0rest");
    assert_eq!(reader.read_until(b"\0"), Some(&b""[..]));
    assert_eq!(reader.read_index(), 1);
    assert_eq!(reader.remaining(), b"rest");
}

#[test]
fn test_read_until_multi_byte_separator() {
    let mut reader = ReadBuffer::new(b"one\r\ntwo\r\n");
    assert_eq!(reader.read_until(b"\r\n"), Some(&b"one"[..]));
    assert_eq!(reader.read_until(b"\r\n"), Some(&b"two"[..]));
    assert_eq!(reader.read_until(b"\r\n"), None);
}

#[test]
fn test_read_c_str() {
    let mut reader = ReadBuffer::new(b"hi\0tail");
    assert_eq!(reader.read_c_str(), Some("hi"));
    assert_eq!(reader.remaining(), b"tail");

    let mut reader = ReadBuffer::new(b"unterminated");
    assert_eq!(reader.read_c_str(), None);
    assert_eq!(reader.read_index(), 0);
}

#[test]
fn test_reads_advance_and_bound_check() {
    let mut reader = ReadBuffer::new(&[1u8, 2, 3, 4]);
    assert_eq!(reader.read_byte(), 1);
    assert_eq!(reader.read_bytes(2), &[2, 3]);
    assert_eq!(reader.read_index(), 3);
    assert_eq!(reader.size(), 4);
}

#[test]
#[should_panic(expected = "read index overflow")]
fn test_read_past_end_is_fatal() {
    let mut reader = ReadBuffer::new(&[1u8, 2]);
    reader.read_int();
}

#[test]
#[should_panic(expected = "read index out of bound")]
fn test_set_read_index_out_of_range_is_fatal() {
    let mut reader = ReadBuffer::new(&[1u8, 2]);
    reader.set_read_index(2);
}
