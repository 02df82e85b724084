use core::ffi::c_int;

use crate::ring_buffer::RingBuffer;
use crate::semaphore::Semaphore;
use crate::{define_test_suite, fnv1a32, numfmt, string};

pub fn test_ring_buffer_fifo_order() -> c_int {
    let mut ring: RingBuffer<u8, 4> = RingBuffer::new();
    for v in [10u8, 20, 30] {
        if !ring.try_push(v) {
            return -1;
        }
    }
    for expected in [10u8, 20, 30] {
        if ring.try_pop() != Some(expected) {
            return -1;
        }
    }
    if ring.try_pop().is_some() {
        return -1;
    }
    0
}

pub fn test_ring_buffer_rejects_when_full() -> c_int {
    let mut ring: RingBuffer<u8, 2> = RingBuffer::new();
    if !ring.try_push(1) || !ring.try_push(2) {
        return -1;
    }
    if ring.try_push(3) {
        return -1;
    }
    if ring.len() != 2 {
        return -1;
    }
    0
}

pub fn test_ring_buffer_wraps() -> c_int {
    let mut ring: RingBuffer<u32, 3> = RingBuffer::new();
    for round in 0..10u32 {
        if !ring.try_push(round) {
            return -1;
        }
        if ring.try_pop() != Some(round) {
            return -1;
        }
    }
    0
}

pub fn test_semaphore_counts() -> c_int {
    let sem = Semaphore::new();
    if sem.try_take() {
        return -1;
    }
    sem.give();
    sem.give();
    if sem.count() != 2 {
        return -1;
    }
    if !sem.try_take() || !sem.try_take() {
        return -1;
    }
    if sem.try_take() {
        return -1;
    }
    0
}

pub fn test_fnv1a32_known_vectors() -> c_int {
    // Reference values for the 32-bit FNV-1a parameters.
    if fnv1a32(b"") != 2166136261 {
        return -1;
    }
    if fnv1a32(b"a") != 0xE40C292C {
        return -1;
    }
    if fnv1a32(b"foobar") != 0xBF9CF968 {
        return -1;
    }
    0
}

pub fn test_fmt_u64() -> c_int {
    let mut buf = [0u8; 20];
    if numfmt::fmt_u64(0, &mut buf) != b"0" {
        return -1;
    }
    if numfmt::fmt_u64(42, &mut buf) != b"42" {
        return -1;
    }
    if numfmt::fmt_u64(1234567890, &mut buf) != b"1234567890" {
        return -1;
    }
    0
}

pub fn test_fmt_i64_negative() -> c_int {
    let mut buf = [0u8; 21];
    if numfmt::fmt_i64(-15, &mut buf) != b"-15" {
        return -1;
    }
    0
}

pub fn test_bytes_as_str_stops_at_nul() -> c_int {
    let buf = [b'a', b'b', 0, b'c'];
    if string::bytes_as_str(&buf) != "ab" {
        return -1;
    }
    0
}

pub fn test_copy_padded_truncates() -> c_int {
    let mut buf = [0xFFu8; 4];
    string::copy_padded(&mut buf, "abcdef");
    if &buf != b"abc\0" {
        return -1;
    }
    0
}

define_test_suite!(
    lib,
    [
        test_ring_buffer_fifo_order,
        test_ring_buffer_rejects_when_full,
        test_ring_buffer_wraps,
        test_semaphore_counts,
        test_fnv1a32_known_vectors,
        test_fmt_u64,
        test_fmt_i64_negative,
        test_bytes_as_str_stops_at_nul,
        test_copy_padded_truncates,
    ]
);
