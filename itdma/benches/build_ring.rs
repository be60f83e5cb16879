use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use fireprog_itdma::{CipHeader, DataPacket, ProgramBuilder, SkipStrategy};

const RING_SIZES: [usize; 3] = [8, 64, 512];

fn bench_build_ring(c: &mut Criterion) {
    let mut group = c.benchmark_group("IT ring build");

    for &cycles in &RING_SIZES {
        group.bench_with_input(BenchmarkId::from_parameter(cycles), &cycles, |b, &cycles| {
            b.iter(|| {
                let mut builder = ProgramBuilder::new(0x8000_0000).unwrap();
                for i in 0..cycles {
                    let mut packet =
                        DataPacket::new(8, 2, CipHeader::new(0x3F02_0000, 0x9002_FFFF));
                    packet.fragments = 1 + (i % 3) as u32;
                    packet.irq = i == cycles - 1;
                    builder.add_data_packet(&packet).unwrap();
                }
                builder.finalize(SkipStrategy::Next).unwrap()
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_build_ring);
criterion_main!(benches);
