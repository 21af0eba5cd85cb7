use tessera::buffer::{Arena, ReadBuffer, WriteBuffer};

#[test]
fn test_fixed_buffer_never_reallocates_within_capacity() {
    let mut buffer = WriteBuffer::new_fixed(16);
    let base = buffer.content().as_ptr();

    buffer.write_int(2024);
    buffer.write_long(-1);
    buffer.write_bytes(&[1, 2, 3, 4]);

    assert_eq!(buffer.size(), 16, "capacity must not change");
    assert_eq!(buffer.content().as_ptr(), base, "region must not move");
    assert_eq!(buffer.content().len(), buffer.write_index());
    assert_eq!(buffer.write_index(), 16);
}

#[test]
#[should_panic(expected = "fixed write buffer must not be resized")]
fn test_fixed_buffer_overflow_is_fatal() {
    let mut buffer = WriteBuffer::new_fixed(4);
    buffer.write_long(1);
}

#[test]
fn test_heap_buffer_growth_rule_and_preservation() {
    let mut buffer = WriteBuffer::new_heap(4);
    buffer.write_int(0x1234_5678);
    assert_eq!(buffer.size(), 4, "no growth within capacity");

    // Next cursor 8, doubled capacity 8: both agree.
    buffer.write_int(-1);
    assert_eq!(buffer.size(), 8);

    // Next cursor 17 exceeds doubled capacity 16: request wins.
    buffer.write_bytes(&[7u8; 9]);
    assert_eq!(buffer.size(), 17);
    assert_eq!(buffer.write_index(), 17);

    let content = buffer.content();
    assert_eq!(&content[0..4], &0x1234_5678i32.to_ne_bytes());
    assert_eq!(&content[4..8], &(-1i32).to_ne_bytes());
    assert_eq!(&content[8..17], &[7u8; 9]);
}

#[test]
fn test_arena_buffer_grows_from_its_arena() {
    let mut buffer = WriteBuffer::new_arena(Arena::new(), 8);
    for i in 0..8 {
        buffer.write_long(i);
    }
    assert_eq!(buffer.write_index(), 64);
    assert!(buffer.size() >= 64);

    let mut reader = ReadBuffer::new(buffer.content());
    for i in 0..8 {
        assert_eq!(reader.read_long(), i);
    }
}

#[test]
fn test_reserved_buffer_leaves_original_region_to_the_caller() {
    let mut backing = [0u8; 8];

    {
        let mut buffer = unsafe { WriteBuffer::new_reserved(backing.as_mut_ptr(), 8) };
        buffer.write_int(42);
        assert_eq!(buffer.size(), 8, "still inside the reserved region");

        // Growth moves the cursor into buffer-owned memory; the reserved
        // region stays valid and untouched from here on.
        buffer.write_long(-42);
        assert!(buffer.size() >= 12);

        let mut reader = ReadBuffer::new(buffer.content());
        assert_eq!(reader.read_int(), 42);
        assert_eq!(reader.read_long(), -42);
    }

    // The pre-growth bytes were written in place.
    assert_eq!(&backing[0..4], &42i32.to_ne_bytes());
}

#[test]
fn test_terminated_string_coalesces_trailing_terminator() {
    let mut buffer = WriteBuffer::new_heap(16);
    buffer.write_c_str("a");
    buffer.write_c_str("b");
    assert_eq!(buffer.content(), b"b\0");

    let mut buffer = WriteBuffer::new_heap(16);
    buffer.write_c_str_with("a", false);
    buffer.write_c_str_with("b", false);
    assert_eq!(buffer.content(), b"a\0b\0");
}

#[test]
fn test_truncate_shares_storage_and_adjusts_cursor() {
    let mut buffer = WriteBuffer::new_heap(16);
    buffer.write_bytes(b"hello world");

    let tail = buffer.truncate(6);
    assert_eq!(tail.content(), b"world");
    assert_eq!(tail.write_index(), 5);

    // The truncated view keeps the policy: it can still grow.
    let mut tail = tail;
    tail.write_bytes(&[b'!'; 32]);
    assert_eq!(&tail.content()[..5], b"world");
    assert_eq!(tail.write_index(), 37);
}

#[test]
fn test_set_patches_written_region() {
    let mut buffer = WriteBuffer::new_heap(32);
    buffer.write_int(0);
    buffer.write_long(0);
    buffer.write_byte(0);

    buffer.set_int(0, 7);
    buffer.set_long(4, -7);
    buffer.set_byte(12, 0xAB);

    let mut reader = ReadBuffer::new(buffer.content());
    assert_eq!(reader.read_int(), 7);
    assert_eq!(reader.read_long(), -7);
    assert_eq!(reader.read_byte(), 0xAB);
}

#[test]
#[should_panic(expected = "index out of bound")]
fn test_set_past_cursor_is_fatal() {
    let mut buffer = WriteBuffer::new_heap(32);
    buffer.write_int(1);
    buffer.set_long(0, 2);
}

#[test]
fn test_typed_round_trip_at_offsets() {
    let mut buffer = WriteBuffer::new_heap(2);
    buffer.write_byte(0x5A);
    buffer.write_short(-12345);
    buffer.write_int(i32::MIN);
    buffer.write_long(i64::MAX);

    let mut reader = ReadBuffer::new(buffer.content());
    assert_eq!(reader.read_byte(), 0x5A);
    assert_eq!(reader.read_short(), -12345);
    assert_eq!(reader.read_int(), i32::MIN);
    assert_eq!(reader.read_long(), i64::MAX);
    assert_eq!(reader.read_index(), buffer.write_index());
}
