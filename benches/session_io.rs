//! Secure session benchmarks
//!
//! Measures the adapter's cost over loopback TCP:
//! - full wrap (handshake) + close
//! - echo round trips of various payload sizes through one session
//!
//! Run with: cargo bench --bench session_io

use bytes::BytesMut;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::io::{Read, Write};
use std::time::Duration;
use tlswrap::testing::{TestPki, TestServer};

const HOST: &str = "example.test";

/// Echo until the client goes away
fn echo_server(pki: &TestPki) -> TestServer {
    TestServer::spawn(pki, |tls| {
        let mut buf = vec![0u8; 16 * 1024];
        loop {
            match tls.read(&mut buf) {
                Ok(0) | Err(_) => return Ok(()),
                Ok(n) => tls.write_all(&buf[..n])?,
            }
        }
    })
    .unwrap()
}

fn bench_wrap_close(c: &mut Criterion) {
    let pki = TestPki::generate(HOST).unwrap();
    let config = pki.client_config().unwrap();

    c.bench_function("wrap_close", |b| {
        b.iter(|| {
            let server = echo_server(&pki);
            let session = config.wrap(server.connect().unwrap(), HOST).unwrap();
            black_box(session.close());
            server.join().unwrap();
        });
    });
}

fn bench_echo_round_trip(c: &mut Criterion) {
    let pki = TestPki::generate(HOST).unwrap();
    let config = pki.client_config().unwrap();
    let server = echo_server(&pki);
    let mut session = config.wrap(server.connect().unwrap(), HOST).unwrap();

    let mut group = c.benchmark_group("echo_round_trip");

    for size in [64usize, 1024, 16 * 1024] {
        let payload = vec![0x5au8; size];
        let mut buf = BytesMut::with_capacity(size);

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &payload, |b, payload| {
            b.iter(|| {
                session.write(black_box(payload)).unwrap();
                buf.clear();
                while buf.len() < payload.len() {
                    session.read_buf(&mut buf, payload.len(), None).unwrap();
                }
                black_box(&buf);
            });
        });
    }

    group.finish();

    drop(session.shutdown());
    server.join().unwrap();
}

criterion_group! {
    name = handshake;
    config = Criterion::default()
        .measurement_time(Duration::from_secs(10))
        .sample_size(50);
    targets = bench_wrap_close
}

criterion_group! {
    name = data_path;
    config = Criterion::default()
        .measurement_time(Duration::from_secs(10))
        .sample_size(500);
    targets = bench_echo_round_trip
}

criterion_main!(handshake, data_path);
