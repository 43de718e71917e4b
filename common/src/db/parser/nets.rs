use crate::db::core::{DbError, Sink, SystemDB};
use crate::db::indices::FpgaId;
use anyhow::{Context, Result};
use std::fs;

pub fn parse(db: &mut SystemDB, filename: &str) -> Result<()> {
    let text =
        fs::read_to_string(filename).context(format!("Failed to open net file: {}", filename))?;
    parse_str(db, &text).context(format!("Malformed net file: {}", filename))?;
    log::info!(
        "Loaded {} signals with {} sinks (avg sink weight {:.2})",
        db.num_signals(),
        db.num_sinks(),
        db.avg_sink_weight()
    );
    Ok(())
}

/// One signal per line: `source,sink1,...,sinkN,name,w1,...,wN`. The name is
/// the first field containing an underscore after its first character.
pub fn parse_str(db: &mut SystemDB, text: &str) -> Result<(), DbError> {
    for (n, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let err = |msg: String| DbError::Parse { line: n + 1, msg };

        let mut terminals = Vec::new();
        let mut weights = Vec::new();
        let mut name = None;
        for field in line.split(',').map(str::trim) {
            if field.find('_').is_some_and(|pos| pos > 0) {
                name = Some(field.to_string());
            } else if name.is_some() {
                weights.push(
                    field
                        .parse::<u32>()
                        .map_err(|e| err(format!("bad weight '{}': {}", field, e)))?,
                );
            } else {
                terminals.push(
                    field
                        .parse::<u32>()
                        .map_err(|e| err(format!("bad FPGA id '{}': {}", field, e)))?,
                );
            }
        }

        let name = name.ok_or_else(|| err("missing signal name".to_string()))?;
        let Some((&source, sinks)) = terminals.split_first() else {
            return Err(err(format!("signal '{}' has no source", name)));
        };
        if sinks.len() != weights.len() {
            return Err(DbError::WeightMismatch {
                name,
                sinks: sinks.len(),
                weights: weights.len(),
            });
        }
        let sinks = sinks
            .iter()
            .zip(&weights)
            .map(|(&fpga, &weight)| Sink {
                fpga: FpgaId(fpga),
                weight,
            })
            .collect();
        db.add_signal(name, FpgaId(source), sinks)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ring_db() -> SystemDB {
        let mut db = SystemDB::new();
        for i in 0..4 {
            db.topology
                .connect(FpgaId::new(i), FpgaId::new((i + 1) % 4), 1);
        }
        db
    }

    #[test]
    fn parses_terminals_name_and_weights() {
        let mut db = ring_db();
        parse_str(&mut db, "0,2,3,net_0,5,1\n\n1,3,net_1,2\n").unwrap();
        assert_eq!(db.num_signals(), 2);
        let s = &db.signals[0];
        assert_eq!(s.name, "net_0");
        assert_eq!(s.source, FpgaId(0));
        assert_eq!(
            s.sinks,
            vec![
                Sink {
                    fpga: FpgaId(2),
                    weight: 5
                },
                Sink {
                    fpga: FpgaId(3),
                    weight: 1
                }
            ]
        );
        assert_eq!(db.signals[1].total_sink_weight, 2);
        assert_eq!(db.num_sinks(), 3);
    }

    #[test]
    fn rejects_weight_count_mismatch() {
        let mut db = ring_db();
        let err = parse_str(&mut db, "0,2,3,net_0,5\n").unwrap_err();
        assert!(matches!(
            err,
            DbError::WeightMismatch {
                sinks: 2,
                weights: 1,
                ..
            }
        ));
    }

    #[test]
    fn rejects_unknown_fpga() {
        let mut db = ring_db();
        assert!(matches!(
            parse_str(&mut db, "0,9,net_0,1\n"),
            Err(DbError::UnknownFpga { fpga: 9, .. })
        ));
    }
}
