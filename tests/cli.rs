use std::fs;
use std::path::Path;
use std::process::Command;

use anyhow::Result;
use assert_cmd::prelude::*;
use assert_fs::TempDir;
use ndarray::Array2;
use ndarray_npy::write_npy;
use predicates::prelude::*;

macro_rules! cargo_run {
    ($cmd:expr, $($args:expr),*) => {
        {
            let mut cmd = Command::cargo_bin($cmd)?;
            $(cmd.arg($args);)*
            cmd.assert()
        }
    };
}

const PATTERNS: [u8; 4] = [0x00, 0xFF, 0x0F, 0xF0];

/// 每张图片由若干个模式组成，(模式编号, 数量)
const IMAGES: [&[(usize, usize)]; 4] =
    [&[(0, 4), (1, 4)], &[(2, 4), (3, 4)], &[(0, 2), (2, 6)], &[(1, 6), (3, 2)]];

fn write_descriptors(path: &Path, layout: &[(usize, usize)]) -> Result<()> {
    let rows: usize = layout.iter().map(|(_, n)| n).sum();
    let mut codes = Array2::<u8>::zeros((rows, 32));
    let mut row = 0;
    for &(pattern, n) in layout {
        for _ in 0..n {
            codes.row_mut(row).fill(PATTERNS[pattern]);
            row += 1;
        }
    }
    write_npy(path, &codes)?;
    Ok(())
}

fn make_dataset(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir)?;
    for (i, layout) in IMAGES.iter().enumerate() {
        write_descriptors(&dir.join(format!("{:06}.npy", i)), layout)?;
    }
    Ok(())
}

#[test]
fn train_add_search() -> Result<()> {
    let conf_dir = TempDir::new()?;
    let dataset = conf_dir.path().join("dataset");
    make_dataset(&dataset)?;

    cargo_run!(
        "bowsearch", "-c", conf_dir.path(), "train", &dataset, "-k", "4", "--subsampling", "1",
        "-s", "npy", "--suffix", "npy"
    )
    .success()
    .stdout(predicate::str::contains("words\t4"));
    assert!(conf_dir.path().join("vocabulary.bin").exists());

    cargo_run!("bowsearch", "-c", conf_dir.path(), "add", &dataset, "-s", "npy", "--suffix", "npy")
        .success()
        .stdout(predicate::str::contains("added\t4"));

    let query = dataset.join("000002.npy");
    cargo_run!("bowsearch", "-c", conf_dir.path(), "search", &query, "-s", "npy", "--count", "1")
        .success()
        .stdout(predicate::str::contains(query.to_str().unwrap()));

    cargo_run!("bowsearch", "-c", conf_dir.path(), "show")
        .success()
        .stdout(predicate::str::contains("state\tcommitted"))
        .stdout(predicate::str::contains("images\t4"));

    Ok(())
}

#[test]
fn search_json_output() -> Result<()> {
    let conf_dir = TempDir::new()?;
    let dataset = conf_dir.path().join("dataset");
    make_dataset(&dataset)?;

    cargo_run!(
        "bowsearch", "-c", conf_dir.path(), "train", &dataset, "-k", "4", "--subsampling", "1",
        "-s", "npy", "--suffix", "npy"
    )
    .success();
    cargo_run!("bowsearch", "-c", conf_dir.path(), "add", &dataset, "-s", "npy", "--suffix", "npy")
        .success();

    let query = dataset.join("000000.npy");
    cargo_run!(
        "bowsearch", "-c", conf_dir.path(), "search", &query, "-s", "npy", "--output-format", "json"
    )
    .success()
    .stdout(predicate::str::contains("\"image_id\": 1"))
    .stdout(predicate::str::contains("\"score\""));

    Ok(())
}

#[test]
fn search_without_vocabulary() -> Result<()> {
    let conf_dir = TempDir::new()?;
    cargo_run!("bowsearch", "-c", conf_dir.path(), "search", "missing.npy", "-s", "npy").failure();
    Ok(())
}

#[test]
fn eval_relocalization() -> Result<()> {
    let conf_dir = TempDir::new()?;
    let reference = conf_dir.path().join("reference");
    let queries = conf_dir.path().join("queries");
    make_dataset(&reference)?;
    make_dataset(&queries)?;

    let trajectory = conf_dir.path().join("Trajectory.txt");
    fs::write(&trajectory, "0 1.0 1.0 0\n1 5.0 2.0 0\n2 9.0 3.0 0\n3 13.0 4.0 0\n")?;

    cargo_run!(
        "bowsearch", "-c", conf_dir.path(), "train", &reference, "-k", "4", "--subsampling", "1",
        "-s", "npy", "--suffix", "npy"
    )
    .success();
    cargo_run!("bowsearch", "-c", conf_dir.path(), "add", &reference, "-s", "npy", "--suffix", "npy")
        .success();

    cargo_run!(
        "bowsearch", "-c", conf_dir.path(), "eval", &queries, "-t", &trajectory, "-r", "reference",
        "-s", "npy", "--suffix", "npy", "--top-n", "1"
    )
    .success()
    .stdout(predicate::str::contains("mean_error\t0.0000"));

    Ok(())
}
