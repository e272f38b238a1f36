//! Tail probabilities used by the hypothesis tests.
//!
//! Student's t and Fisher's F come from `statrs`. The studentized range
//! distribution (needed for Tukey's post-hoc comparison) is not available
//! there and is integrated numerically with Gauss-Legendre quadrature
//! (Copenhaver & Holland, 1988).

use statrs::distribution::{ContinuousCDF, FisherSnedecor, StudentsT};
use statrs::function::erf::erfc;
use statrs::function::gamma::ln_gamma;
use std::f64::consts::{LN_2, SQRT_2};

/// Two-sided p-value of a t statistic.
pub fn t_two_sided_p(t: f64, df: f64) -> Option<f64> {
    if !t.is_finite() || !(df > 0.0) {
        return None;
    }
    let dist = StudentsT::new(0.0, 1.0, df).ok()?;
    let p = 2.0 * (1.0 - dist.cdf(t.abs()));
    p.is_finite().then_some(p.clamp(0.0, 1.0))
}

/// Upper-tail p-value of an F statistic.
pub fn f_upper_p(f: f64, df1: f64, df2: f64) -> Option<f64> {
    if !f.is_finite() || f < 0.0 {
        return None;
    }
    let dist = FisherSnedecor::new(df1, df2).ok()?;
    let p = 1.0 - dist.cdf(f);
    p.is_finite().then_some(p.clamp(0.0, 1.0))
}

/// Standard normal CDF.
fn phi(x: f64) -> f64 {
    0.5 * erfc(-x / SQRT_2)
}

// Gauss-Legendre nodes/weights (positive half) for the inner integral.
const INNER_NODES: [f64; 6] = [
    0.981_560_634_246_719_3,
    0.904_117_256_370_474_9,
    0.769_902_674_194_304_7,
    0.587_317_954_286_617_4,
    0.367_831_498_998_180_2,
    0.125_233_408_511_468_9,
];
const INNER_WEIGHTS: [f64; 6] = [
    0.047_175_336_386_511_83,
    0.106_939_325_995_318_43,
    0.160_078_328_543_346_23,
    0.203_167_426_723_065_92,
    0.233_492_536_538_354_8,
    0.249_147_045_813_402_8,
];

// Nodes/weights for the outer integral over the chi distribution.
const OUTER_NODES: [f64; 8] = [
    0.989_400_934_991_649_9,
    0.944_575_023_073_232_6,
    0.865_631_202_387_831_7,
    0.755_404_408_355_003,
    0.617_876_244_402_643_7,
    0.458_016_777_657_227_4,
    0.281_603_550_779_258_9,
    0.095_012_509_837_637_44,
];
const OUTER_WEIGHTS: [f64; 8] = [
    0.027_152_459_411_754_095,
    0.062_253_523_938_647_89,
    0.095_158_511_682_492_78,
    0.124_628_971_255_533_87,
    0.149_595_988_816_576_73,
    0.169_156_519_395_002_54,
    0.182_603_415_044_923_6,
    0.189_450_610_455_068_5,
];

/// Probability that the range of `groups` standard normals is below `w`
/// (infinite degrees of freedom).
fn range_probability(w: f64, groups: f64) -> f64 {
    const UPPER: f64 = 8.0;
    let half = w * 0.5;
    if half >= UPPER {
        return 1.0;
    }

    let mut pr_w = 2.0 * phi(half) - 1.0;
    pr_w = if pr_w >= (-50.0 / groups).exp() {
        pr_w.powf(groups)
    } else {
        0.0
    };

    let intervals = if w > 3.0 { 2.0 } else { 3.0 };
    let step = (UPPER - half) / intervals;
    let mut lower = half;
    let mut upper = half + step;
    let cc1 = groups - 1.0;
    let mut integral = 0.0;

    for _ in 0..intervals as usize {
        let mid = 0.5 * (upper + lower);
        let radius = 0.5 * (upper - lower);
        let mut sum = 0.0;

        for (sign, idx) in [-1.0, 1.0]
            .into_iter()
            .flat_map(|sign| (0..INNER_NODES.len()).map(move |idx| (sign, idx)))
        {
            let x = mid + sign * radius * INNER_NODES[idx];
            let expo = x * x;
            if expo > 60.0 {
                continue;
            }
            let inner = phi(x) - phi(x - w);
            if inner >= (-30.0 / cc1).exp() {
                sum += INNER_WEIGHTS[idx] * (-0.5 * expo).exp() * inner.powf(cc1);
            }
        }

        integral += sum * (2.0 * radius * groups) / (2.0 * std::f64::consts::PI).sqrt();
        lower = upper;
        upper += step;
    }

    pr_w += integral;
    if pr_w <= (-30.0f64).exp() {
        return 0.0;
    }
    pr_w.min(1.0)
}

/// CDF of the studentized range distribution for `groups` means and `df`
/// error degrees of freedom.
pub fn studentized_range_cdf(q: f64, groups: usize, df: f64) -> Option<f64> {
    if groups < 2 || !(df >= 2.0) || q.is_nan() {
        return None;
    }
    if q <= 0.0 {
        return Some(0.0);
    }
    if q.is_infinite() {
        return Some(1.0);
    }
    let groups = groups as f64;
    if df > 25_000.0 {
        return Some(range_probability(q, groups));
    }

    let half_df = df * 0.5;
    let interval: f64 = if df <= 100.0 {
        1.0
    } else if df <= 800.0 {
        0.5
    } else if df <= 5000.0 {
        0.25
    } else {
        0.125
    };
    let log_const = half_df * df.ln() - df * LN_2 - ln_gamma(half_df) + interval.ln();
    let quarter_df = df * 0.25;

    let mut total = 0.0;
    for i in 1..=50 {
        let center = (2 * i - 1) as f64 * interval;
        let mut sum = 0.0;

        for (idx, node) in OUTER_NODES.iter().enumerate() {
            let offset = node * interval;
            for u in [center - offset, center + offset] {
                let log_density = log_const + (half_df - 1.0) * u.ln() - u * quarter_df;
                if log_density < -30.0 {
                    continue;
                }
                let w = q * (u * 0.5).sqrt();
                sum += range_probability(w, groups) * OUTER_WEIGHTS[idx] * log_density.exp();
            }
        }

        if i as f64 * interval >= 1.0 && sum <= 1e-14 {
            break;
        }
        total += sum;
    }

    Some(total.clamp(0.0, 1.0))
}

/// Upper-tail p-value of a studentized range statistic.
pub fn studentized_range_p(q: f64, groups: usize, df: f64) -> Option<f64> {
    studentized_range_cdf(q, groups, df).map(|cdf| (1.0 - cdf).clamp(0.0, 1.0))
}
