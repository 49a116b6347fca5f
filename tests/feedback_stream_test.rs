use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use privpush::push::feedback::{FEEDBACK_BUFFER_LEN, FEEDBACK_FRAME_LEN};
use privpush::push::FeedbackSession;
use tokio::io::{duplex, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

fn frame(seconds: u32, seed: u8) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(FEEDBACK_FRAME_LEN);
    bytes.extend_from_slice(&seconds.to_be_bytes());
    bytes.extend_from_slice(&32u16.to_be_bytes());
    bytes.extend((0..32u8).map(|i| i.wrapping_add(seed)));
    bytes
}

#[tokio::test]
async fn test_many_records_across_uneven_reads() {
    // 超过一个缓冲区的数据量，按不对齐的块写入
    let count = (FEEDBACK_BUFFER_LEN / FEEDBACK_FRAME_LEN) * 3 + 7;
    let base = Utc::now().timestamp() as u32 - 3600;
    let bytes: Vec<u8> = (0..count).flat_map(|i| frame(base + i as u32, i as u8)).collect();

    let (mut writer, reader) = duplex(97);
    let feeder = tokio::spawn(async move {
        for chunk in bytes.chunks(53) {
            writer.write_all(chunk).await.unwrap();
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        writer.shutdown().await.unwrap();
    });

    let records: Vec<_> = FeedbackSession::new(reader, true)
        .into_stream(CancellationToken::new())
        .collect()
        .await;
    feeder.await.unwrap();

    assert_eq!(records.len(), count);
    for (i, record) in records.into_iter().enumerate() {
        let record = record.unwrap();
        assert_eq!(record.timestamp.timestamp(), i64::from(base + i as u32));
        let expected: Vec<u8> = (0..32u8).map(|b| b.wrapping_add(i as u8)).collect();
        assert_eq!(record.device_token, hex::encode(expected));
    }
}

#[tokio::test]
async fn test_trailing_partial_frame_is_ignored() {
    let now = Utc::now().timestamp() as u32;
    let mut bytes = frame(now - 5, 1);
    bytes.extend_from_slice(&frame(now - 4, 2)[..20]);

    let (mut writer, reader) = duplex(256);
    writer.write_all(&bytes).await.unwrap();
    drop(writer);

    let cancel = CancellationToken::new();
    let mut session = FeedbackSession::new(reader, false);
    assert!(session.next_record(&cancel).await.unwrap().is_some());
    assert!(session.next_record(&cancel).await.unwrap().is_none());
    assert!(session.next_record(&cancel).await.unwrap().is_none());
}
