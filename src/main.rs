use std::time::Instant;

use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info_span};

mod fd;

use fd::{FixedDecimal, Sign, CELL_DIGITS, GUARD_CELLS};

// Fractional digits resolved by one loop round of an arctan pass; each
// round divides the term by x^2 twice, so this is log10(x^4).
const DIGITS_PER_ROUND_5: f64 = 2.79588001734407;
const DIGITS_PER_ROUND_239: f64 = 9.51359160379253;

// The single-pass borrow/carry normalization is verified up to a million
// digits; larger requests are rejected rather than silently degraded.
const MAX_DIGITS: usize = 1_000_000;

/// Compute digits of pi with the Machin formula
/// pi/4 = 4*arctan(1/5) - arctan(1/239).
#[derive(Parser)]
#[command(version)]
struct Args {
    /// Decimal digits after the point (underscores allowed, e.g. 100_000)
    #[arg(default_value_t = 60, value_parser = parse_digits)]
    digits: usize,

    /// Print the digits as one unbroken line instead of grouped blocks
    #[arg(long)]
    plain: bool,

    /// Suppress the progress bar
    #[arg(short, long)]
    quiet: bool,

    /// Record a chrome://tracing profile of the computation
    #[arg(long)]
    trace: bool,
}

fn parse_digits(arg: &str) -> Result<usize, String> {
    let digits: usize = arg
        .replace('_', "")
        .parse()
        .map_err(|_| "digits should be a valid number".to_string())?;
    if digits == 0 || digits > MAX_DIGITS {
        return Err(format!("digits should be between 1 and {MAX_DIGITS}"));
    }
    Ok(digits)
}

fn main() {
    let args = Args::parse();

    let _guard = init_tracing(args.trace);

    let bar = if args.quiet {
        ProgressBar::hidden()
    } else {
        progress_bar(args.digits)
    };

    let start = Instant::now();
    let pi = machin(args.digits, &bar);
    bar.finish_and_clear();
    let elapsed = start.elapsed();

    if args.plain {
        println!("{pi}");
    } else {
        print_grouped(&pi);
    }

    eprintln!(
        "{} ms to compute {} digits of pi",
        elapsed.as_millis(),
        args.digits
    );
}

/// pi = 16*arctan(1/5) - 4*arctan(1/239), evaluated in fixed point with
/// guard cells so the requested prefix comes out exact.
fn machin(digits: usize, bar: &ProgressBar) -> String {
    let precision = digits / CELL_DIGITS + GUARD_CELLS;
    debug!(digits, precision, "allocating term and sum buffers");

    let mut p = FixedDecimal::with_precision(precision);
    let mut t = FixedDecimal::with_precision(precision);

    arctan_recip(&mut p, &mut t, 5, Sign::Add, bar);
    p.mul_small(4);

    arctan_recip(&mut p, &mut t, 239, Sign::Sub, bar);
    p.mul_small(4);

    p.normalize();
    p.to_decimal(digits)
}

/// Accumulate `sign * arctan(1/x)` into `p`, reusing `t` as the shrinking
/// term buffer. Runs until the term underflows to zero at the buffer's
/// precision; returns the number of loop rounds that took.
fn arctan_recip(
    p: &mut FixedDecimal,
    t: &mut FixedDecimal,
    x: i64,
    sign: Sign,
    bar: &ProgressBar,
) -> u64 {
    let _span = info_span!("arctan", x).entered();
    let x2 = x * x;

    // First term, 1/x. Borrows and carries from the accumulation are
    // postponed until normalize at the very end.
    t.set_one();
    t.div_small(x);
    p.accumulate(sign, t, 1);

    // Each round advances two series terms, dividing the standing term by
    // x^2 before each accumulation; the odd denominators step in
    // (n, n + 2) pairs.
    let mut n = 3;
    let mut rounds = 0;
    loop {
        t.div_small(x2);
        p.accumulate(sign.flipped(), t, n);

        t.div_small(x2);
        p.accumulate(sign, t, n + 2);

        rounds += 1;
        bar.inc(1);

        if t.is_zero() {
            break;
        }
        n += 4;
    }
    debug!(x, rounds, "arctan series converged");
    rounds
}

fn progress_bar(digits: usize) -> ProgressBar {
    let cell_digits = ((digits / CELL_DIGITS + GUARD_CELLS + 1) * CELL_DIGITS) as f64;
    let rounds =
        (cell_digits / DIGITS_PER_ROUND_5).ceil() + (cell_digits / DIGITS_PER_ROUND_239).ceil();

    let bar = ProgressBar::new(rounds as u64);
    bar.set_style(ProgressStyle::with_template("{bar:40} {pos}/{len} terms ({elapsed})").unwrap());
    bar
}

/// Classic table layout: a space every 10 digits, a line break every 50,
/// a blank line every 1000.
fn print_grouped(pi: &str) {
    let (int_part, frac) = pi.split_once('.').unwrap_or((pi, ""));
    println!("pi = {int_part}.");
    println!();

    let mut out = String::with_capacity(frac.len() + frac.len() / 8);
    for (i, c) in frac.chars().enumerate() {
        out.push(c);
        let n = i + 1;
        if n % 1000 == 0 {
            out.push_str("\n\n");
        } else if n % 50 == 0 {
            out.push('\n');
        } else if n % 10 == 0 {
            out.push(' ');
        }
    }
    println!("{}", out.trim_end());
}

fn init_tracing(trace: bool) -> Option<tracing_chrome::FlushGuard> {
    use tracing_subscriber::prelude::*;

    if trace {
        let (chrome, guard) = tracing_chrome::ChromeLayerBuilder::new()
            .include_args(true)
            .build();
        tracing_subscriber::registry().with(chrome).init();
        Some(guard)
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_writer(std::io::stderr)
            .init();
        None
    }
}

#[cfg(test)]
mod tests {
    use indicatif::ProgressBar;

    use crate::fd::{FixedDecimal, Sign, CELL_DIGITS, GUARD_CELLS};
    use crate::{arctan_recip, machin};

    // First 100 digits, from http://www.numberworld.org/digits/Pi/
    const PI_100: &str = "3.1415926535897932384626433832795028841971693993751\
                          058209749445923078164062862089986280348253421170679";

    #[test]
    fn matches_reference_prefix() {
        for digits in [1, 10, 25, 100] {
            let pi = machin(digits, &ProgressBar::hidden());
            assert_eq!(
                pi,
                PI_100[..2 + digits],
                "testing {digits} digits of pi (right = expected)"
            );
        }
    }

    #[test]
    fn truncates_instead_of_rounding() {
        // digit 11 of pi is 8, so rounding would end this in ...6536
        let pi = machin(10, &ProgressBar::hidden());
        assert_eq!(pi, "3.1415926535");
    }

    #[test]
    fn verify_last_10_digits() {
        // http://www.numberworld.org/digits/Pi/
        for (digits, expected_last_10) in [
            (100, "3421170679"),
            (1000, "2164201989"),
            (10_000, "5256375678"),
        ] {
            let pi = machin(digits, &ProgressBar::hidden());
            let actual_last_10 = &pi[pi.len() - 10..];

            assert_eq!(
                actual_last_10, expected_last_10,
                "testing {digits} digits of pi (right = expected)"
            );
        }
    }

    #[test]
    fn output_is_deterministic() {
        let first = machin(500, &ProgressBar::hidden());
        let second = machin(500, &ProgressBar::hidden());
        assert_eq!(first, second);
    }

    #[test]
    fn arctan_term_underflows() {
        let precision = 100 / CELL_DIGITS + GUARD_CELLS;
        let mut p = FixedDecimal::with_precision(precision);
        let mut t = FixedDecimal::with_precision(precision);

        let rounds = arctan_recip(&mut p, &mut t, 5, Sign::Add, &ProgressBar::hidden());

        assert!(t.is_zero());
        assert!(rounds <= 2 * (precision as u64 + 1), "ran {rounds} rounds");
    }
}
