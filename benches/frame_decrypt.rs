//! Benchmark frame parsing and AES-GCM opening, the per-byte cost of every session.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use oculux::pipeline::{
    decrypt_frame, seal_stream, AesGcmCipher, FrameReader, KeyMaterial, DEFAULT_SEAL_FRAME_LEN,
};

const OBJECT_LEN: usize = 4 * 1024 * 1024;

fn cipher() -> AesGcmCipher {
    let material = KeyMaterial::from_hex(
        "0102030405060708090a0b0c",
        "000102030405060708090a0b0c0d0e0f",
    )
    .unwrap();
    AesGcmCipher::new(&material).unwrap()
}

fn bench_frame_reader(c: &mut Criterion) {
    let cipher = cipher();
    let plaintext = vec![0x5au8; OBJECT_LEN];
    let sealed = seal_stream(&cipher, &plaintext, DEFAULT_SEAL_FRAME_LEN).unwrap();

    let mut group = c.benchmark_group("frame_reader");
    group.throughput(Throughput::Bytes(sealed.len() as u64));

    for chunk_len in [16 * 1024, 64 * 1024, 256 * 1024] {
        group.bench_with_input(BenchmarkId::new("chunked", chunk_len), &chunk_len, |b, &len| {
            b.iter(|| {
                let mut reader = FrameReader::new();
                let mut frames = 0usize;
                for chunk in sealed.chunks(len) {
                    reader.push(black_box(chunk));
                    while let Some(frame) = reader.next_frame().unwrap() {
                        frames += frame.len();
                    }
                }
                frames
            });
        });
    }

    group.finish();
}

fn bench_decrypt(c: &mut Criterion) {
    let cipher = cipher();
    let mut group = c.benchmark_group("decrypt_frame");

    for frame_len in [4 * 1024, DEFAULT_SEAL_FRAME_LEN, 256 * 1024] {
        let plaintext = vec![0xa5u8; frame_len];
        let sealed = seal_stream(&cipher, &plaintext, frame_len).unwrap();
        let mut reader = FrameReader::new();
        reader.push(&sealed);
        let frame = reader.next_frame().unwrap().unwrap();

        group.throughput(Throughput::Bytes(frame_len as u64));
        group.bench_with_input(BenchmarkId::new("aes_gcm", frame_len), &frame, |b, frame| {
            b.iter(|| decrypt_frame(&cipher, black_box(frame)).unwrap());
        });
    }

    group.finish();
}

criterion_group!(benches, bench_frame_reader, bench_decrypt);
criterion_main!(benches);
