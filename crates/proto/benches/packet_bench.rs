//! Transport Performance Benchmarks
//!
//! Packet sealing and opening throughput for the default cipher/MAC pairs,
//! plus message codec cost for channel data.
//!
//! Run with: `cargo bench --bench packet_bench`

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use conduit_proto::ssh::{
    ChannelData, CipherAlgorithm, DirectionKeys, MacAlgorithm, Message, PacketReader,
    PacketWriter,
};

const SIZES: [usize; 3] = [64, 1024, 32 * 1024];

const SUITES: [(CipherAlgorithm, MacAlgorithm); 3] = [
    (CipherAlgorithm::Aes128Ctr, MacAlgorithm::HmacSha256),
    (CipherAlgorithm::Aes256Ctr, MacAlgorithm::HmacSha256Etm),
    (CipherAlgorithm::Aes256Cbc, MacAlgorithm::HmacSha512),
];

fn keys(cipher: CipherAlgorithm, mac: MacAlgorithm) -> DirectionKeys {
    let key = vec![0x5au8; cipher.key_size()];
    let iv = vec![0xa5u8; cipher.iv_size()];
    let mac_key = vec![0x3cu8; mac.key_size()];
    DirectionKeys {
        cipher: cipher.create(&key, &iv).unwrap(),
        mac: Some(mac.create(&mac_key).unwrap()),
    }
}

fn data_payload(size: usize) -> Vec<u8> {
    Message::ChannelData(ChannelData::new(7, vec![0x42u8; size])).encode()
}

/// Benchmark packet sealing
fn bench_seal(c: &mut Criterion) {
    let mut group = c.benchmark_group("packet_seal");

    for (cipher, mac) in SUITES {
        for size in SIZES {
            let payload = data_payload(size);
            group.throughput(Throughput::Bytes(size as u64));
            group.bench_function(format!("{}+{}/{}", cipher.name(), mac.name(), size), |b| {
                let mut writer = PacketWriter::new(tokio::io::sink());
                writer.set_keys(keys(cipher, mac));
                b.iter(|| black_box(writer.seal(black_box(&payload)).unwrap()));
            });
        }
    }

    group.finish();
}

/// Benchmark packet opening (decrypt, MAC check, deframe)
fn bench_open(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap();
    let mut group = c.benchmark_group("packet_open");

    for (cipher, mac) in SUITES {
        for size in SIZES {
            let payload = data_payload(size);
            let mut writer = PacketWriter::new(tokio::io::sink());
            writer.set_keys(keys(cipher, mac));
            let frame = writer.seal(&payload).unwrap();

            group.throughput(Throughput::Bytes(size as u64));
            group.bench_function(format!("{}+{}/{}", cipher.name(), mac.name(), size), |b| {
                b.iter_batched(
                    || {
                        let mut reader = PacketReader::new(frame.as_slice());
                        reader.set_keys(keys(cipher, mac));
                        reader
                    },
                    |mut reader| {
                        let packet = runtime.block_on(reader.read_packet()).unwrap();
                        black_box(packet)
                    },
                    BatchSize::SmallInput,
                );
            });
        }
    }

    group.finish();
}

/// Benchmark message codec
fn bench_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("message_codec");
    let payload = data_payload(1024);

    group.throughput(Throughput::Bytes(1024));
    group.bench_function("decode_channel_data", |b| {
        b.iter(|| black_box(Message::decode(black_box(&payload)).unwrap()));
    });

    let message = Message::decode(&payload).unwrap();
    group.bench_function("encode_channel_data", |b| {
        b.iter(|| black_box(message.encode()));
    });

    group.finish();
}

criterion_group!(benches, bench_seal, bench_open, bench_codec);
criterion_main!(benches);
