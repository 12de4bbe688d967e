//! CSV export of a result set: one row per candidate, raw samples omitted.

use std::io::Write;

use serde::Serialize;

use super::ResultSet;

#[derive(Debug, Serialize)]
struct CsvRow<'a> {
    candidate: &'a str,
    samples: usize,
    mean: f64,
    median: f64,
    min: f64,
    max: f64,
    filter_reason: &'a str,
}

pub fn write_results_csv<W: Write>(results: &ResultSet, out: W) -> Result<(), csv::Error> {
    let mut writer = csv::Writer::from_writer(out);
    for (candidate, result) in results {
        writer.serialize(CsvRow {
            candidate,
            samples: result.sample_count,
            mean: result.mean,
            median: result.median,
            min: result.min,
            max: result.max,
            filter_reason: result.filter_reason.map(|r| r.as_str()).unwrap_or(""),
        })?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::{FilterReason, PartialResult};

    #[test]
    fn writes_header_and_one_row_per_candidate() {
        let mut results = ResultSet::new();
        results.insert("100101".into(), PartialResult::from_samples(vec![0.5, 1.5]));
        let mut dropped = PartialResult::from_samples(vec![0.0]);
        dropped.filter_reason = Some(FilterReason::NegligibleEffect);
        results.insert("200331".into(), dropped);

        let mut buf = Vec::new();
        write_results_csv(&results, &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines[0], "candidate,samples,mean,median,min,max,filter_reason");
        assert_eq!(lines[1], "100101,2,1.0,1.0,0.5,1.5,");
        assert_eq!(lines[2], "200331,1,0.0,0.0,0.0,0.0,negligible-effect");
    }
}
