// src/utils/entropy.rs

/// Byte histogram over the whole slice.
pub fn byte_frequencies(data: &[u8]) -> [u64; 256] {
    let mut frequencies = [0u64; 256];
    for byte in data {
        frequencies[*byte as usize] += 1;
    }
    frequencies
}

/// Calculates the Shannon entropy of a byte slice, in bits per byte.
/// Returns 0.0 for empty input.
pub fn calculate_entropy(data: &[u8]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }

    let len = data.len() as f64;
    byte_frequencies(data)
        .iter()
        .filter(|&&count| count > 0)
        .map(|&count| {
            let p = count as f64 / len;
            -p * p.log2()
        })
        .sum()
}
