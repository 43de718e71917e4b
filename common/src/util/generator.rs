use rand::Rng;
use rand::seq::index::sample;
use std::fmt::Write as _;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

pub fn fpga_label(id: usize) -> String {
    format!("U{}/M{}/F{}[SLR0]", id / 100, (id / 10) % 10, id % 10)
}

pub fn random_system<R: Rng>(rng: &mut R, num_fpgas: usize) -> String {
    let cols = (num_fpgas as f64).sqrt().ceil().max(1.0) as usize;
    let mut out = String::new();
    for i in 0..num_fpgas {
        let mut nbrs = Vec::with_capacity(2);
        if (i + 1) % cols != 0 && i + 1 < num_fpgas {
            nbrs.push(i + 1);
        }
        if i + cols < num_fpgas {
            nbrs.push(i + cols);
        }
        for j in nbrs {
            let pairs = rng.gen_range(1..=4);
            let _ = writeln!(out, "{}---{}, pairs={}", fpga_label(i), fpga_label(j), pairs);
            let _ = writeln!(out, "{}---{}, pairs={}", fpga_label(j), fpga_label(i), pairs);
        }
    }
    out
}

pub fn random_nets<R: Rng>(
    rng: &mut R,
    num_fpgas: usize,
    num_signals: usize,
    max_sinks: usize,
) -> String {
    let mut out = String::new();
    if num_fpgas < 2 {
        return out;
    }
    let max_sinks = max_sinks.clamp(1, num_fpgas - 1);
    for s in 0..num_signals {
        let fanout = rng.gen_range(1..=max_sinks);
        let picked = sample(rng, num_fpgas, fanout + 1).into_vec();
        let weights: Vec<u32> = (0..fanout).map(|_| rng.gen_range(1..=20)).collect();

        let mut fields: Vec<String> = picked.iter().map(|id| id.to_string()).collect();
        fields.push(format!("net_{}", s));
        fields.extend(weights.iter().map(|w| w.to_string()));
        let _ = writeln!(out, "{}", fields.join(","));
    }
    out
}

pub fn generate_random_benchmark(
    output_dir: &str,
    num_fpgas: usize,
    num_signals: usize,
    max_sinks: usize,
) -> std::io::Result<(PathBuf, PathBuf)> {
    let mut rng = rand::thread_rng();
    log::info!(
        "Generating Benchmark: {} FPGAs, {} signals, up to {} sinks per signal",
        num_fpgas,
        num_signals,
        max_sinks
    );

    let dir = Path::new(output_dir);
    std::fs::create_dir_all(dir)?;
    let sys_path = dir.join("random.system");
    let net_path = dir.join("random.net");

    File::create(&sys_path)?.write_all(random_system(&mut rng, num_fpgas).as_bytes())?;
    File::create(&net_path)?.write_all(
        random_nets(&mut rng, num_fpgas, num_signals, max_sinks).as_bytes(),
    )?;
    Ok((sys_path, net_path))
}
