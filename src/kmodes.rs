use log::{debug, info};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rayon::prelude::*;

use crate::hamming::{hamming, nearest_hamming};
use crate::kmeans::{frequency, init_plus_plus};

#[derive(Debug, Clone, Default)]
pub struct KModeState<const N: usize> {
    /// 聚类中心到所有向量的总距离
    pub distsum: u64,
    /// 聚类中心
    pub centroids: Vec<[u8; N]>,
    /// 每个聚类中心包含的向量数量
    pub centroid_frequency: Vec<usize>,
}

/// K-modes 聚类算法，用于二进制向量
///
/// 距离为汉明距离，聚类中心为每个 bit 位上的众数。
/// 使用固定种子进行 k-means++ 初始化，相同输入和种子得到相同结果。
/// k 超过向量数量时会被截断。
pub fn kmodes_binary<const N: usize>(
    data: &[[u8; N]],
    k: usize,
    max_iter: usize,
    seed: u64,
) -> KModeState<N> {
    if data.is_empty() || k == 0 {
        return KModeState::default();
    }
    let k = k.min(data.len());

    let mut rng = StdRng::seed_from_u64(seed);
    let init = init_plus_plus(data.len(), k, &mut rng, |i, j| {
        let d = hamming::<N>(&data[i], &data[j]) as f64;
        d * d
    });
    let mut centroids: Vec<[u8; N]> = init.into_iter().map(|i| data[i]).collect();
    info!("KModes 初始化完成，中心点数量 = {k}");

    let (mut assignments, mut distance) = update_assignments(data, &centroids);
    for nr in 0..max_iter {
        let new_centroids = update_centroids(data, &assignments, &centroids);
        let (new_assignments, new_distance) = update_assignments(data, &new_centroids);
        debug!("第 {} 轮 - 距离和：{} -> {}", nr, distance, new_distance);

        // 如果距离没有变小，则算法收敛
        if new_distance >= distance {
            break;
        }
        centroids = new_centroids;
        assignments = new_assignments;
        distance = new_distance;
    }

    let centroid_frequency = frequency(&assignments, k);
    info!("KModes 完成，总距离：{}，不平衡度：{:.2}", distance, imbalance_factor(&centroid_frequency));

    KModeState { distsum: distance, centroids, centroid_frequency }
}

/// 将每个点分配给最近的聚类中心，并返回聚类中心的序号和总距离
fn update_assignments<const N: usize>(
    data: &[[u8; N]],
    centroids: &[[u8; N]],
) -> (Vec<usize>, u64) {
    let (assignments, distances): (Vec<_>, Vec<_>) =
        data.par_iter().map(|point| nearest_hamming(point, centroids)).unzip();
    let distance = distances.iter().map(|&d| d as u64).sum();
    (assignments, distance)
}

/// 更新聚类中心：计算分配给每个聚类的所有点在每个 bit 上的众数
///
/// 没有分配到任何点的聚类保留原来的中心
fn update_centroids<const N: usize>(
    data: &[[u8; N]],
    assignments: &[usize],
    old: &[[u8; N]],
) -> Vec<[u8; N]> {
    let k = old.len();
    let bits = N * 8;
    // 每个聚类每个 bit 位上 1 的数量
    let mut bit_counts = vec![0u32; k * bits];
    let mut counts = vec![0u32; k];

    for (point, &c) in data.iter().zip(assignments) {
        counts[c] += 1;
        let row = &mut bit_counts[c * bits..(c + 1) * bits];
        for (byte_pos, &byte_val) in point.iter().enumerate() {
            for bit_pos in 0..8 {
                if (byte_val >> bit_pos) & 1 == 1 {
                    row[byte_pos * 8 + bit_pos] += 1;
                }
            }
        }
    }

    let mut centroids = old.to_vec();
    for (c, centroid) in centroids.iter_mut().enumerate() {
        if counts[c] == 0 {
            continue;
        }
        let half_count = counts[c] / 2;
        let row = &bit_counts[c * bits..(c + 1) * bits];
        for (byte_pos, byte) in centroid.iter_mut().enumerate() {
            let mut new_byte = 0u8;
            for bit_pos in 0..8 {
                if row[byte_pos * 8 + bit_pos] > half_count {
                    new_byte |= 1 << bit_pos;
                }
            }
            *byte = new_byte;
        }
    }
    centroids
}

/// 计算不平衡因子，1 表示完全平衡
pub fn imbalance_factor(hist: &[usize]) -> f32 {
    let (mut tot, mut uf) = (0.0, 0.0);
    for h in hist {
        let h = *h as f32;
        tot += h;
        uf += h.powf(2.0);
    }
    if tot == 0.0 {
        return 0.0;
    }
    uf * hist.len() as f32 / tot.powf(2.0)
}

#[cfg(test)]
mod tests {
    use rand::Rng;

    use super::*;

    /// 生成样本数据
    fn generate_clustered_data<const N: usize>(n: usize, num_clusters: usize) -> Vec<[u8; N]> {
        let mut rng = StdRng::seed_from_u64(42); // 使用固定种子确保结果可重现
        let mut data = vec![[0u8; N]; n];

        // 生成聚类中心模板
        let mut cluster_centers = vec![[0u8; N]; num_clusters];
        for center in &mut cluster_centers {
            rng.fill(&mut center[..]);
        }

        // 为每个向量分配到某个聚类，并在聚类中心附近生成数据
        for i in 0..n {
            let cluster_id = i % num_clusters;
            let base_center = &cluster_centers[cluster_id];

            for j in 0..N {
                let noise_bits = rng.random::<u8>() & 0x01; // 只改变最低位作为噪声
                data[i][j] = base_center[j] ^ noise_bits;
            }
        }

        data
    }

    #[test]
    fn test_kmodes_simple() {
        let data: Vec<[u8; 4]> = vec![
            [0b11110000, 0b11110000, 0b00001111, 0b00001111], // 类型1
            [0b11111111, 0b11110000, 0b00001111, 0b00000000], // 类型1
            [0b00001111, 0b00001111, 0b11110000, 0b11110000], // 类型2
            [0b00000000, 0b00001111, 0b11110000, 0b11111111], // 类型2
        ];

        let ks = kmodes_binary(&data, 2, 100, 42);

        assert_eq!(ks.centroids.len(), 2);
        assert_eq!(ks.centroid_frequency.iter().sum::<usize>(), 4);
    }

    #[test]
    fn test_kmodes_two_distinct_codes() {
        let mut data = vec![[0x00u8; 32]; 12];
        data.extend(vec![[0xFFu8; 32]; 4]);

        let ks = kmodes_binary(&data, 2, 20, 42);
        let mut centroids = ks.centroids.clone();
        centroids.sort();
        assert_eq!(centroids, vec![[0x00; 32], [0xFF; 32]]);
        assert_eq!(ks.distsum, 0);
    }

    #[test]
    fn test_kmodes_clustered() {
        let data = generate_clustered_data::<32>(512, 8);
        let ks = kmodes_binary::<32>(&data, 8, 50, 42);
        assert_eq!(ks.centroids.len(), 8);
        assert_eq!(ks.centroid_frequency.iter().sum::<usize>(), 512);
    }

    #[test]
    fn test_kmodes_deterministic() {
        let data = generate_clustered_data::<32>(256, 4);
        let a = kmodes_binary::<32>(&data, 6, 20, 1);
        let b = kmodes_binary::<32>(&data, 6, 20, 1);
        assert_eq!(a.centroids, b.centroids);
    }

    #[test]
    fn test_kmodes_clamps_k() {
        let data = vec![[1u8; 4], [2u8; 4]];
        let ks = kmodes_binary(&data, 10, 10, 0);
        assert_eq!(ks.centroids.len(), 2);
    }

    #[test]
    fn test_imbalance_factor() {
        // (2² + 2² + 1²) * 3 / (2 + 2 + 1)² = 1.08
        assert!((imbalance_factor(&[2, 2, 1]) - 1.08).abs() < 0.01);
        assert_eq!(imbalance_factor(&[0, 0]), 0.0);
    }
}
