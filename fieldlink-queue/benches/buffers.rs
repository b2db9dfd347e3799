use bytes::Bytes;
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::{rngs::StdRng, Rng, SeedableRng};

use fieldlink_queue::{
    BandwidthControlBuffer, GenericController, PacketBuffer, PriorityBuffer, QueueBuffer,
};
use fieldlink_wire::Packet;

const N_PACKETS: usize = 10_000;
const CLASSES: usize = 5;

/// Random sized packets with a random class.
fn workload() -> Vec<(Packet, i32)> {
    let mut rng = StdRng::seed_from_u64(42);
    (0..N_PACKETS)
        .map(|_| {
            let len = rng.gen_range(1..512);
            let class = rng.gen_range(0..CLASSES as i32);
            (Packet::new(class as u8, Bytes::from(vec![0u8; len])), class)
        })
        .collect()
}

fn fill_and_drain(buffer: &dyn PacketBuffer, packets: &[(Packet, i32)], prioritized: bool) {
    for (packet, class) in packets {
        if prioritized {
            buffer.enqueue_with_priority(packet.clone(), *class).unwrap();
        } else {
            buffer.enqueue(packet.clone());
        }
    }

    while buffer.dequeue().is_some() {}
}

fn buffers(c: &mut Criterion) {
    let packets = workload();

    let mut group = c.benchmark_group("fill_and_drain");
    group.throughput(Throughput::Elements(N_PACKETS as u64));

    group.bench_function(BenchmarkId::from_parameter("queue"), |b| {
        let buffer = QueueBuffer::with_capacity(N_PACKETS);
        b.iter(|| fill_and_drain(&buffer, &packets, false));
    });

    group.bench_function(BenchmarkId::from_parameter("priority"), |b| {
        let buffer = PriorityBuffer::with_classes(CLASSES).unwrap();
        b.iter(|| fill_and_drain(&buffer, &packets, true));
    });

    group.bench_function(BenchmarkId::from_parameter("bandwidth"), |b| {
        let buffer = BandwidthControlBuffer::with_weights(vec![16, 8, 4, 2, 1]).unwrap();
        b.iter(|| fill_and_drain(&buffer, &packets, true));
    });

    group.bench_function(BenchmarkId::from_parameter("generic"), |b| {
        let buffer = GenericController::new();
        b.iter(|| fill_and_drain(&buffer, &packets, true));
    });

    group.finish();
}

criterion_group!(benches, buffers);
criterion_main!(benches);
