use anyhow::Result;
use tracing::{ info, warn };
use tracing_subscriber::{ fmt, prelude::*, EnvFilter };
use ion_superpositions::{
    BfgsOptions,
    Colour,
    Internal,
    MinimizeResult,
    PulseSequence,
    StateSpec,
};

const COLOURS: &str = "rcbrb";
const FIXED_PHASE: bool = false;
const RESTARTS: usize = 10;
const GTOL: f64 = 1e-8;
const MAXITERS: usize = 1000;
const THRESHOLD: f64 = 1e-6;

fn target() -> Vec<StateSpec> {
    vec![
        (0, Internal::G).into(),
        (2, Internal::E).into(),
    ]
}

fn init_logging(level: &str) {
    let filter
        = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .init();
}

fn main() -> Result<()> {
    init_logging("info");

    let colours = Colour::parse_sequence(COLOURS)?;
    let target = target();
    let mut seq = PulseSequence::new(&colours, Some(&target), FIXED_PHASE, None)?;
    let opts = BfgsOptions::default().with_gtol(GTOL).with_maxiter(MAXITERS);

    let mut best: Option<MinimizeResult> = None;
    for k in 0..RESTARTS {
        let res = seq.optimise(None, None, &opts)?;
        info!(restart = k, distance = res.fun, nit = res.nit, "{}", res.message());
        if best.as_ref().map_or(true, |b| res.fun < b.fun) {
            best = Some(res);
        }
        if best.as_ref().is_some_and(|b| b.fun < THRESHOLD) { break; }
    }
    let Some(best) = best else { return Ok(()); };
    if best.fun >= THRESHOLD {
        warn!(distance = best.fun, "no restart reached the threshold");
    }

    let (angles, phases) = seq.split_result(&best)?;
    println!("colours:  {}", COLOURS);
    println!("distance: {:.3e}", best.fun);
    println!("angles:   {:.6}", angles);
    println!("phases:   {:.6}", phases);
    let trace = seq.trace(angles.as_slice())?;
    println!("{}", trace);
    Ok(())
}
