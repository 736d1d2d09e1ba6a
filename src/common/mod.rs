//! Common functionality.

use clap::Parser;
use clap_verbosity_flag::{InfoLevel, Verbosity};

pub mod io;

/// Commonly used command line arguments.
#[derive(Parser, Debug)]
pub struct Args {
    /// Verbosity of the program
    #[clap(flatten)]
    pub verbose: Verbosity<InfoLevel>,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            verbose: Verbosity::new(0, 0),
        }
    }
}

/// The version of the `synteruptor` package.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Sign of an integer difference, as used for orientation bookkeeping.
pub fn sign(value: i64) -> i64 {
    match value {
        v if v > 0 => 1,
        v if v < 0 => -1,
        _ => 0,
    }
}

/// Median of a slice of positions; even counts average the two middle values.
///
/// Returns `None` for an empty slice.  The input does not need to be sorted.
pub fn median(values: &[i64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_unstable();
    let n = sorted.len();
    if n % 2 == 1 {
        Some(sorted[n / 2] as f64)
    } else {
        Some((sorted[n / 2 - 1] + sorted[n / 2]) as f64 / 2.0)
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    #[rstest::rstest]
    #[case(5, 1)]
    #[case(-3, -1)]
    #[case(0, 0)]
    fn sign(#[case] value: i64, #[case] expected: i64) {
        assert_eq!(expected, super::sign(value));
    }

    #[rstest::rstest]
    #[case(&[], None)]
    #[case(&[7], Some(7.0))]
    #[case(&[3, 1, 2], Some(2.0))]
    #[case(&[4, 1, 3, 2], Some(2.5))]
    fn median(#[case] values: &[i64], #[case] expected: Option<f64>) {
        assert_eq!(expected, super::median(values));
    }
}
