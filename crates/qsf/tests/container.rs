//! Full-stack scenarios: encryption and collector flows through the facade.

use std::io::Cursor;

use futures_util::StreamExt;

use qsf::crypto::{AesGcmEncoder, AesGcmFactory, Key};
use qsf::filter::collector::CidCollector;
use qsf::filter::zstr::{zstr, ZCodec};
use qsf::frame::{iter_frames, FrameType};
use qsf::reader::{QsfReader, ReaderOptions, StreamEvent};
use qsf::writer::{QsfWriter, WriteEntry};
use qsf::Error;

async fn write_container(entries: Vec<WriteEntry>) -> Vec<u8> {
    let mut writer = QsfWriter::new(Vec::new());
    for entry in entries {
        writer.write_entry(entry).await.expect("entry written");
    }
    writer.finish().await.expect("finished")
}

async fn collect_events(container: Vec<u8>, options: ReaderOptions) -> Vec<StreamEvent> {
    let mut reader = QsfReader::with_options(Cursor::new(container), options);
    let mut events = Vec::new();
    while let Some(event) = reader.next().await {
        events.push(event.expect("no reader error"));
    }
    events
}

#[tokio::test]
async fn test_encrypt_roundtrip() {
    let key = Key::generate();
    let container = write_container(vec![
        WriteEntry::new("top secret payload").encoder(AesGcmEncoder::new(key.clone())),
    ])
    .await;

    // Ciphertext on the wire, not plaintext.
    assert!(!container
        .windows(b"top secret".len())
        .any(|w| w == b"top secret"));

    let options = ReaderOptions::new().decoder(AesGcmFactory::new().with_key(key));
    let mut events = collect_events(container, options).await;
    let StreamEvent::Begin(begin) = events.remove(0) else {
        panic!("expected begin first");
    };
    let plain = begin.decode().expect("key known").read_to_end().await.expect("ok");
    assert_eq!(&plain[..], b"top secret payload");
}

#[tokio::test]
async fn test_wrong_key_is_a_decrypt_failure() {
    let right = Key::generate();
    let wrong = Key::generate();
    let container = write_container(vec![
        WriteEntry::new("top secret payload").encoder(AesGcmEncoder::new(right.clone())),
    ])
    .await;

    // Force the wrong key under the fingerprint the manifest names.
    let options = ReaderOptions::new()
        .decoder(AesGcmFactory::new().with_key_for(right.fingerprint(), wrong));
    let mut events = collect_events(container, options).await;
    let StreamEvent::Begin(begin) = events.remove(0) else {
        panic!("expected begin first");
    };
    match begin.decode().expect("slot resolves").read_to_end().await {
        Err(Error::DecryptFailure) => {}
        other => panic!("expected DecryptFailure, got {:?}", other.map(|_| ())),
    }
}

#[tokio::test]
async fn test_two_distinct_ciphertexts_for_same_plaintext() {
    let key = Key::generate();
    async fn sealed_once(key: Key) -> Vec<u8> {
        write_container(vec![
            WriteEntry::new("same plaintext").encoder(AesGcmEncoder::new(key)),
        ])
        .await
    }
    let a = sealed_once(key.clone()).await;
    let b = sealed_once(key).await;
    let data_payloads = |buf: &[u8]| -> Vec<Vec<u8>> {
        iter_frames(buf)
            .filter_map(|item| item.ok())
            .filter(|(f, _)| f.kind() == Some(FrameType::StreamData))
            .map(|(f, _)| f.payload.to_vec())
            .collect()
    };
    assert_ne!(data_payloads(&a), data_payloads(&b));
}

#[tokio::test]
async fn test_three_filter_pipeline() {
    let key = Key::generate();
    let collector_free_cid = qsf::filter::cid::cid();
    let cid_handle = collector_free_cid.handle();
    let input = "abcdefghij".repeat(220);
    assert_eq!(input.len(), 2200);

    let container = write_container(vec![
        WriteEntry::new(input.clone())
            .encoder(collector_free_cid)
            .encoder(zstr(ZCodec::Deflate))
            .encoder(AesGcmEncoder::new(key.clone())),
    ])
    .await;

    // Every stored chunk carries the 12-byte IV plus the 16-byte tag.
    for (frame, _) in iter_frames(&container).filter_map(|item| item.ok()) {
        if frame.kind() == Some(FrameType::StreamData) {
            assert!(frame.payload.len() > 28);
        }
    }

    let options = ReaderOptions::new().decoder(AesGcmFactory::new().with_key(key));
    let mut events = collect_events(container, options).await;
    let StreamEvent::Begin(begin) = events.remove(0) else {
        panic!("expected begin first");
    };
    assert_eq!(begin.filters.len(), 3);
    let plain = begin.decode().expect("all resolved").read_to_end().await.expect("ok");
    assert_eq!(&plain[..], input.as_bytes());

    let StreamEvent::End(end) = events.remove(0) else {
        panic!("expected end second");
    };
    assert_eq!(end.filter_results.len(), 3);
    let first = serde_json::to_value(&end.filter_results[0]).expect("serializable");
    assert_eq!(first["type"], "CID.result");
    assert_eq!(first["cid"], cid_handle.get().expect("resolved").as_str());
}

#[tokio::test]
async fn test_collector_combines_document_and_metadata() {
    let key = Key::generate();
    let mut collector = CidCollector::with_combine_id("rec-1");
    let doc_slot = collector.slot();
    let meta_slot = collector.slot();

    let container = write_container(vec![
        WriteEntry::new("the actual document content")
            .encoder(doc_slot)
            .encoder(zstr(ZCodec::Deflate))
            .encoder(AesGcmEncoder::new(key.clone())),
        WriteEntry::new(r#"{"primaryKey":"doc-42","filename":"report.pdf"}"#.to_owned())
            .encoder(meta_slot)
            .encoder(zstr(ZCodec::Deflate)),
    ])
    .await;

    let combined = collector.result().expect("all members flushed");
    let members = collector.member_cids().expect("resolved");
    assert!(combined.starts_with("bafkrei"));
    assert_eq!(members.len(), 2);
    assert!(!members.contains(&combined));

    let options = ReaderOptions::new().decoder(AesGcmFactory::new().with_key(key));
    let events = collect_events(container, options).await;
    let combine_ids: Vec<_> = events
        .iter()
        .filter_map(|event| match event {
            StreamEvent::Begin(begin) => Some(begin.combine_id.clone()),
            StreamEvent::End(_) => None,
        })
        .collect();
    assert_eq!(combine_ids, vec![Some("rec-1".into()), Some("rec-1".into())]);
}
