//! # Queue End-to-End Test Suite
//!
//! Drives the full stack (queue → topic → volume → rounds) through the
//! public API: FIFO ordering, counters, close semantics, restart
//! durability, index corruption detection, and parallel producers and
//! consumers.

use mfq::{Error, Queue};
use tempfile::tempdir;

fn open_queue(path: &std::path::Path) -> Queue {
    Queue::open(path).expect("failed to open queue")
}

mod single_topic {
    use super::*;

    #[test]
    fn put_get_peek_drop_lifecycle() {
        let dir = tempdir().unwrap();
        let q = open_queue(dir.path());
        let topic = q.get(0).unwrap();

        // Empty topic: everything reports end-of-file.
        let err = topic.drop_message(0).unwrap_err();
        assert!(Error::is(&err, Error::EndOfFile));
        let err = topic.peek().unwrap_err();
        assert!(Error::is(&err, Error::EndOfFile));
        let err = topic.get().unwrap_err();
        assert!(Error::is(&err, Error::EndOfFile));

        topic.put(b"abcd").unwrap();
        assert_eq!(topic.pending(), 1);
        assert_eq!(topic.count(), 1);

        assert_eq!(topic.get().unwrap(), b"abcd");
        assert_eq!(topic.pending(), 0);
        assert_eq!(topic.count(), 1);

        let err = topic.get().unwrap_err();
        assert!(Error::is(&err, Error::EndOfFile));

        // Peek does not consume.
        topic.put(b"1234").unwrap();
        assert_eq!(topic.peek().unwrap(), b"1234");
        assert_eq!(topic.peek().unwrap(), b"1234");

        // Close: pending messages stay readable, puts are refused.
        topic.close().unwrap();
        assert_eq!(topic.peek().unwrap(), b"1234");

        let err = topic.put(b"hello").unwrap_err();
        assert!(Error::is(&err, Error::ClosedTopic));

        topic.drop_message(4).unwrap();
        let err = topic.drop_message(4).unwrap_err();
        assert!(Error::is(&err, Error::ClosedTopic));
        let err = topic.peek().unwrap_err();
        assert!(Error::is(&err, Error::ClosedTopic));
    }

    #[test]
    fn close_is_idempotent_and_survives_restart() {
        let dir = tempdir().unwrap();
        {
            let q = open_queue(dir.path());
            let topic = q.get(3).unwrap();
            topic.put(b"left over").unwrap();
            topic.close().unwrap();
            topic.close().unwrap();
            q.close().unwrap();
        }

        let q = open_queue(dir.path());
        let topic = q.get(3).unwrap();
        assert!(topic.is_closed());
        assert_eq!(topic.pending(), 1);

        assert_eq!(topic.get().unwrap(), b"left over");
        let err = topic.get().unwrap_err();
        assert!(Error::is(&err, Error::ClosedTopic));
        let err = topic.put(b"nope").unwrap_err();
        assert!(Error::is(&err, Error::ClosedTopic));
    }

    #[test]
    fn empty_messages_are_legal() {
        let dir = tempdir().unwrap();
        let q = open_queue(dir.path());
        let topic = q.get(1).unwrap();

        topic.put(b"").unwrap();
        topic.put(b"x").unwrap();
        assert_eq!(topic.get().unwrap(), b"");
        assert_eq!(topic.get().unwrap(), b"x");
        assert_eq!(topic.count(), 2);
        assert_eq!(topic.pending(), 0);
    }
}

mod durability {
    use super::*;

    #[test]
    fn offsets_and_counters_survive_restart() {
        let dir = tempdir().unwrap();
        {
            let q = open_queue(dir.path());
            let topic = q.get(0).unwrap();
            topic.put(b"abcd").unwrap();
            topic.put(b"1234").unwrap();
            assert_eq!(topic.get().unwrap(), b"abcd");
            q.close().unwrap();
        }

        let q = open_queue(dir.path());
        // The topic was rehydrated eagerly, not on first get.
        assert_eq!(q.topics().len(), 1);

        let topic = q.get(0).unwrap();
        assert_eq!(topic.count(), 2);
        assert_eq!(topic.pending(), 1);
        assert_eq!(topic.get().unwrap(), b"1234");
        assert_eq!(topic.pending(), 0);
    }

    #[test]
    fn long_stream_resumes_mid_way() {
        let dir = tempdir().unwrap();
        let message = |i: u32| format!("message-{:04}-{}", i, "x".repeat(1000));

        {
            let q = open_queue(dir.path());
            let topic = q.get(9).unwrap();
            for i in 0..1000 {
                topic.put(message(i).as_bytes()).unwrap();
            }
            for i in 0..377 {
                assert_eq!(topic.get().unwrap(), message(i).as_bytes());
            }
            q.close().unwrap();
        }

        let q = open_queue(dir.path());
        let topic = q.get(9).unwrap();
        assert_eq!(topic.count(), 1000);
        assert_eq!(topic.pending(), 623);
        for i in 377..1000 {
            assert_eq!(topic.get().unwrap(), message(i).as_bytes());
        }
        let err = topic.get().unwrap_err();
        assert!(Error::is(&err, Error::EndOfFile));
    }

    #[test]
    fn corrupted_index_fails_the_open() {
        let dir = tempdir().unwrap();
        {
            let q = open_queue(dir.path());
            let topic = q.get(0).unwrap();
            topic.put(b"payload").unwrap();
            q.close().unwrap();
        }

        // Topic 0's index lives in round 0, slot 0: right behind the
        // 128-byte block header. Flip one bit of the flag field.
        use std::io::{Read, Seek, SeekFrom, Write};
        let round0 = dir.path().join("0");
        let mut file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(&round0)
            .unwrap();
        file.seek(SeekFrom::Start(128 + 4)).unwrap();
        let mut byte = [0u8; 1];
        file.read_exact(&mut byte).unwrap();
        byte[0] ^= 0x01;
        file.seek(SeekFrom::Start(128 + 4)).unwrap();
        file.write_all(&byte).unwrap();
        drop(file);

        let err = Queue::open(dir.path()).unwrap_err();
        assert!(Error::is(&err, Error::BrokenIndex));
    }
}

mod parallel {
    use super::*;

    #[test]
    fn hundred_topics_hundred_messages_each() {
        let dir = tempdir().unwrap();
        let q = open_queue(dir.path());

        std::thread::scope(|s| {
            for id in 0..100u32 {
                let q = &q;
                s.spawn(move || {
                    let topic = q.get(id).unwrap();
                    for _ in 0..100 {
                        topic.put(id.to_string().as_bytes()).unwrap();
                    }
                });
            }

            for id in 0..100u32 {
                let q = &q;
                s.spawn(move || {
                    let topic = q.get(id).unwrap();
                    let mut taken = 0;
                    while taken < 100 {
                        match topic.get() {
                            Ok(msg) => {
                                assert_eq!(msg, id.to_string().as_bytes());
                                taken += 1;
                            }
                            // The consumer raced ahead of its producer.
                            Err(e) if Error::is(&e, Error::EndOfFile) => {
                                std::thread::yield_now();
                            }
                            Err(e) => panic!("unexpected error: {:?}", e),
                        }
                    }
                });
            }
        });

        let total: i64 = q.topics().iter().map(|t| t.count()).sum();
        assert_eq!(total, 10_000);
        assert!(q.topics().iter().all(|t| t.pending() == 0));
    }
}
