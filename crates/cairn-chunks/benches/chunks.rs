use cairn_chunks::{hash_bytes, rolling_checksum, split_blocks, RollingChecksum};

fn make_data(size: usize) -> Vec<u8> {
    // Semi-realistic data: repeating pattern with some entropy
    (0..size)
        .map(|i| (i.wrapping_mul(7) ^ (i >> 3)) as u8)
        .collect()
}

#[divan::bench(args = [1024, 65536, 1048576, 10485760])]
fn blake3_hash(bencher: divan::Bencher, size: usize) {
    let data = make_data(size);
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| hash_bytes(divan::black_box(&data)));
}

#[divan::bench(args = [1024, 65536, 1048576])]
fn rolling_slide(bencher: divan::Bencher, size: usize) {
    let data = make_data(size);
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| {
            let mut rs = RollingChecksum::new(4096);
            for &b in divan::black_box(&data) {
                rs.push(b);
            }
            rs.value()
        });
}

#[divan::bench(args = [4096, 65536])]
fn rolling_from_scratch(bencher: divan::Bencher, size: usize) {
    let data = make_data(size);
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| rolling_checksum(divan::black_box(&data)));
}

#[divan::bench(args = [1048576, 10485760])]
fn split_64k_blocks(bencher: divan::Bencher, size: usize) {
    let data = make_data(size);
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| split_blocks(divan::black_box(&data), 64 * 1024));
}

fn main() {
    divan::main();
}
