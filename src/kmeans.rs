use log::{debug, info};
use ndarray::{Array2, ArrayView1, ArrayView2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

use crate::kmodes::imbalance_factor;

#[derive(Debug, Clone)]
pub struct KMeansState {
    /// 所有向量到所属聚类中心的距离平方和
    pub distsum: f64,
    /// 聚类中心，每行一个
    pub centroids: Array2<f32>,
    /// 每个聚类中心包含的向量数量
    pub centroid_frequency: Vec<usize>,
}

#[inline]
pub fn l2_squared(a: ArrayView1<f32>, b: ArrayView1<f32>) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// 寻找距离 x 最近的聚类中心，返回序号和距离平方
///
/// 距离相同时取序号最小的一个
pub fn nearest_l2(x: ArrayView1<f32>, centroids: ArrayView2<f32>) -> (usize, f32) {
    let mut best = (0, f32::INFINITY);
    for (i, c) in centroids.rows().into_iter().enumerate() {
        let d = l2_squared(x, c);
        if d < best.1 {
            best = (i, d);
        }
    }
    best
}

/// k-means++ 初始化：第一个中心均匀随机选取，之后按 weight 加权抽样
///
/// weight 为某个点到已选中心的"距离权重"，为 0 的点不会被再次选中，
/// 除非所有点的权重都为 0（数据中的不同点少于 k 个）
pub(crate) fn init_plus_plus<F>(n: usize, k: usize, rng: &mut StdRng, weight: F) -> Vec<usize>
where
    F: Fn(usize, usize) -> f64 + Sync,
{
    let mut chosen = Vec::with_capacity(k);
    chosen.push(rng.random_range(0..n));
    let mut nearest: Vec<f64> = (0..n).into_par_iter().map(|i| weight(i, chosen[0])).collect();

    while chosen.len() < k {
        let total: f64 = nearest.iter().sum();
        let next = if total > 0.0 {
            let mut target = rng.random::<f64>() * total;
            let mut pick = None;
            for (i, &w) in nearest.iter().enumerate() {
                if w <= 0.0 {
                    continue;
                }
                pick = Some(i);
                if target < w {
                    break;
                }
                target -= w;
            }
            pick.unwrap_or(0)
        } else {
            rng.random_range(0..n)
        };
        chosen.push(next);
        nearest.par_iter_mut().enumerate().for_each(|(i, w)| {
            *w = w.min(weight(i, next));
        });
    }

    chosen
}

/// 对浮点向量进行 k-means 聚类（Lloyd 迭代）
///
/// 参数：
/// - data: 输入向量，每行一个
/// - k: 聚类中心数量，超过向量数量时会被截断
/// - max_iter: 最大迭代次数
/// - seed: 随机种子，相同输入和种子得到相同结果
pub fn kmeans(data: ArrayView2<f32>, k: usize, max_iter: usize, seed: u64) -> KMeansState {
    let (n, d) = data.dim();
    if n == 0 || k == 0 {
        return KMeansState {
            distsum: 0.0,
            centroids: Array2::zeros((0, d)),
            centroid_frequency: vec![],
        };
    }
    let k = k.min(n);

    let mut rng = StdRng::seed_from_u64(seed);
    let init = init_plus_plus(n, k, &mut rng, |i, j| l2_squared(data.row(i), data.row(j)) as f64);
    let mut centroids = data.select(ndarray::Axis(0), &init);
    info!("KMeans 初始化完成，中心点数量 = {k}");

    let (mut assignments, mut distance) = update_assignments(data, centroids.view());
    for nr in 0..max_iter {
        let new_centroids = update_centroids(data, &assignments, &centroids);
        let (new_assignments, new_distance) = update_assignments(data, new_centroids.view());
        debug!("第 {} 轮 - 距离和变化：{:+.2}", nr, new_distance - distance);

        // 如果距离没有变小，则算法收敛
        if new_distance >= distance {
            break;
        }
        centroids = new_centroids;
        assignments = new_assignments;
        distance = new_distance;
    }

    let centroid_frequency = frequency(&assignments, k);
    info!("KMeans 完成，距离和：{:.2}，不平衡度：{:.2}", distance, imbalance_factor(&centroid_frequency));

    KMeansState { distsum: distance, centroids, centroid_frequency }
}

fn update_assignments(data: ArrayView2<f32>, centroids: ArrayView2<f32>) -> (Vec<usize>, f64) {
    let (assignments, distances): (Vec<_>, Vec<_>) =
        (0..data.nrows()).into_par_iter().map(|i| nearest_l2(data.row(i), centroids)).unzip();
    let distance = distances.iter().map(|&d| d as f64).sum();
    (assignments, distance)
}

/// 重新计算聚类中心，空的聚类保留原来的中心
fn update_centroids(data: ArrayView2<f32>, assignments: &[usize], old: &Array2<f32>) -> Array2<f32> {
    let (k, d) = old.dim();
    let mut sums = Array2::<f64>::zeros((k, d));
    let mut counts = vec![0usize; k];
    for (row, &c) in data.rows().into_iter().zip(assignments) {
        counts[c] += 1;
        for (s, &x) in sums.row_mut(c).iter_mut().zip(row.iter()) {
            *s += x as f64;
        }
    }

    let mut centroids = old.clone();
    for c in 0..k {
        if counts[c] == 0 {
            continue;
        }
        let inv = 1.0 / counts[c] as f64;
        for (dst, &s) in centroids.row_mut(c).iter_mut().zip(sums.row(c).iter()) {
            *dst = (s * inv) as f32;
        }
    }
    centroids
}

pub(crate) fn frequency(assignments: &[usize], k: usize) -> Vec<usize> {
    let mut freq = vec![0; k];
    for &a in assignments {
        freq[a] += 1;
    }
    freq
}
