/// ORB 描述子的字节数（256 bit）
pub const CODE_SIZE: usize = 32;

#[inline(always)]
pub fn hamming<const N: usize>(va: &[u8; N], vb: &[u8; N]) -> u32 {
    match N {
        32 => hamming_32(va, vb),
        _ => hamming_naive(va, vb),
    }
}

#[inline(always)]
pub fn hamming_naive(va: &[u8], vb: &[u8]) -> u32 {
    va.iter().zip(vb).map(|(a, b)| (a ^ b).count_ones()).sum()
}

#[inline(always)]
pub fn hamming_32(va: &[u8], vb: &[u8]) -> u32 {
    // 按 u64 读取，不要求输入地址对齐
    let mut sum = 0;
    let (mut a, mut b) = ([0u8; 8], [0u8; 8]);
    for (ca, cb) in va.chunks_exact(8).zip(vb.chunks_exact(8)) {
        a.copy_from_slice(ca);
        b.copy_from_slice(cb);
        sum += (u64::from_le_bytes(a) ^ u64::from_le_bytes(b)).count_ones();
    }
    sum
}

/// 在 centroids 中寻找距离 va 最近的向量，返回序号和距离
///
/// 距离相同时取序号最小的一个，保证分配结果是确定的
pub fn nearest_hamming<const N: usize>(va: &[u8; N], centroids: &[[u8; N]]) -> (usize, u32) {
    let mut best = (0, u32::MAX);
    for (i, c) in centroids.iter().enumerate() {
        let d = hamming::<N>(va, c);
        if d < best.1 {
            best = (i, d);
            if d == 0 {
                break;
            }
        }
    }
    best
}
