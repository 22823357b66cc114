/// quint_analysis: load session directories, run one quintile analysis on each
/// and write the results as JSON.
///
/// Analyses:
///   mags         magnitude / L2 change between the first and last quintile,
///                regular vs surprise, with a permutation test
///   signif       ROIs with a significant surprise effect in the first and
///                last quintile, grouped by pattern
///   quint        trace statistics per quintile (optionally locked to run
///                onsets)
///   surp-length  surprise-onset statistics per quintile, split by the
///                length of the surprise run
///
/// Sessions whose query matches nothing are skipped with a warning.
use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::PathBuf;

use calcium_quint::{
    analysis::{SurpriseLengthStats, SurpriseQuintileArrays},
    io::{read_json, write_json, StWriter},
    trace_stats_by_surprise_length,
    load_session, quintile_magnitudes, signif_rois_by_group, surprise_quintile_arrays,
    trace_stats_by_quintile_session, ConfigFile, Datatype, Lock, MagnitudeResults, Op, QuintAnalysisOptions,
    QuintileTraceStats, Session, SignifRoiResults, StimPar, StimulusKind, Tails,
};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Analysis {
    Mags,
    Signif,
    Quint,
    SurpLength,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LockArg {
    None,
    Surprise,
    Regular,
    Both,
    RegularSampled,
}

impl From<LockArg> for Lock {
    fn from(l: LockArg) -> Self {
        match l {
            LockArg::None => Lock::None,
            LockArg::Surprise => Lock::Surprise,
            LockArg::Regular => Lock::Regular,
            LockArg::Both => Lock::Both,
            LockArg::RegularSampled => Lock::RegularSampled,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "quint_analysis", about = "Quintile surprise analyses over two-photon sessions")]
struct Args {
    /// Session directories.
    #[arg(required = true)]
    sessions: Vec<PathBuf>,

    /// Analysis to run.
    #[arg(long, value_enum, default_value_t = Analysis::Mags)]
    analysis: Analysis,

    /// Stimulus: gabors or bricks.
    #[arg(long, default_value = "gabors")]
    stim: StimulusKind,

    /// Seconds before each reference frame.
    #[arg(long, default_value_t = 0.0)]
    pre: f64,

    /// Seconds after each reference frame.
    #[arg(long, default_value_t = 1.5)]
    post: f64,

    /// Analyse running speed instead of ROI traces.
    #[arg(long)]
    running: bool,

    /// Segment lock for the `quint` analysis.
    #[arg(long, value_enum, default_value_t = LockArg::None)]
    lock: LockArg,

    /// Number of permutations (overrides the config file).
    #[arg(long)]
    n_perms: Option<usize>,

    /// Significance level (overrides the config file).
    #[arg(long)]
    p_val: Option<f64>,

    /// Tails: lo, up or 2 (overrides the config file).
    #[arg(long)]
    tails: Option<Tails>,

    /// Operation between quintiles.
    #[arg(long, default_value = "diff")]
    op_qu: Op,

    /// Rescale each ROI before group statistics (`signif`).
    #[arg(long)]
    scale: bool,

    /// Seed for permutations and segment sampling.
    #[arg(long, default_value_t = 905)]
    seed: u64,

    /// JSON config file (any subset of session/analysis/perm/quint/groups).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Output JSON path.
    #[arg(long)]
    output: PathBuf,

    /// Also write the integrated regular/surprise arrays (`mags`, `signif`)
    /// to this safetensors file.
    #[arg(long)]
    arrays: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let mut cfg: ConfigFile = match &args.config {
        Some(path) => read_json(path)?,
        None => ConfigFile::default(),
    };
    if let Some(n) = args.n_perms {
        cfg.perm.n_perms = n;
    }
    if let Some(p) = args.p_val {
        cfg.perm.p_val = p;
    }
    if let Some(t) = args.tails {
        cfg.perm.tails = t;
    }
    if matches!(args.analysis, Analysis::Mags | Analysis::Signif) {
        cfg.quint.qu_idx = Some(vec![0, -1]);
    }
    let datatype = if args.running { Datatype::Run } else { Datatype::Roi };
    let stimpar = StimPar::new(args.stim, args.pre, args.post);
    let mut rng = StdRng::seed_from_u64(args.seed);

    let mut out = Outputs {
        mags: MagnitudeResults::new(args.op_qu, cfg.groups.op, cfg.analysis.stat, &cfg.perm),
        signif: SignifRoiResults::new(&cfg.groups, &cfg.perm),
        quint: Vec::new(),
        surp_length: Vec::new(),
        arrays: args.arrays.as_ref().map(|_| StWriter::new()),
    };

    for dir in &args.sessions {
        let session = load_session(dir, &cfg.session)?.value;
        let id = session.id();
        if !session.has_stimulus(args.stim) {
            log::warn!("session {id}: no {} stimulus, skipping", args.stim);
            continue;
        }

        let outcome = analyse(&session, &args, &cfg, &stimpar, datatype, &mut out, &mut rng);

        match outcome {
            Ok(()) => log::info!("session {id}: done"),
            Err(e) if e.is_empty_result() => log::warn!("session {id}: {e}, skipping"),
            Err(e) => return Err(e).with_context(|| format!("analysing session {id}")),
        }
    }

    match args.analysis {
        Analysis::Mags => write_json(&out.mags, &args.output)?,
        Analysis::Signif => write_json(&out.signif, &args.output)?,
        Analysis::Quint => write_json(&out.quint, &args.output)?,
        Analysis::SurpLength => write_json(&out.surp_length, &args.output)?,
    }
    if let (Some(path), Some(w)) = (&args.arrays, &out.arrays) {
        w.write(path).with_context(|| format!("writing arrays to {}", path.display()))?;
        println!("Arrays  → {}", path.display());
    }
    println!("Written → {}", args.output.display());
    Ok(())
}

struct Outputs {
    mags: MagnitudeResults,
    signif: SignifRoiResults,
    quint: Vec<QuintileTraceStats>,
    surp_length: Vec<SurpriseLengthStats>,
    arrays: Option<StWriter>,
}

/// `<session>/<reg|surp>_q<quintile>` → `[unit, sequence]`.
fn add_arrays(w: &mut StWriter, arrays: &SurpriseQuintileArrays) {
    for (name, group) in [("reg", &arrays.reg), ("surp", &arrays.surp)] {
        for (q, arr) in arrays.quintiles.iter().zip(group) {
            w.add_f64_arr2(&format!("{}/{name}_q{q}", arrays.session_id), arr);
        }
    }
}

fn analyse(
    session: &Session,
    args: &Args,
    cfg: &ConfigFile,
    stimpar: &StimPar,
    datatype: Datatype,
    out: &mut Outputs,
    rng: &mut StdRng,
) -> calcium_quint::Result<()> {
    match args.analysis {
        Analysis::Mags => {
            let arrays = surprise_quintile_arrays(session, stimpar, &cfg.quint, &cfg.analysis, datatype, false, rng)?;
            if let Some(w) = out.arrays.as_mut() {
                add_arrays(w, &arrays);
            }
            let res = quintile_magnitudes(&arrays, &cfg.perm, &cfg.analysis, args.op_qu, cfg.groups.op, rng)?;
            out.mags.sessions.push(res);
        }
        Analysis::Signif => {
            let arrays = surprise_quintile_arrays(session, stimpar, &cfg.quint, &cfg.analysis, datatype, false, rng)?;
            if let Some(w) = out.arrays.as_mut() {
                add_arrays(w, &arrays);
            }
            let res = signif_rois_by_group(&arrays, &cfg.perm, &cfg.groups, &cfg.analysis, args.scale, rng)?;
            for (name, n) in res.counts() {
                println!("  session {} {name:>14}: {n}", res.session_id);
            }
            out.signif.sessions.push(res);
        }
        Analysis::Quint => {
            let opts = QuintAnalysisOptions {
                lock: args.lock.into(),
                by_surprise: true,
                nan_empty: true,
                datatype,
                ..QuintAnalysisOptions::default()
            };
            out.quint.push(trace_stats_by_quintile_session(session, stimpar, &cfg.quint, &cfg.analysis, &opts, rng)?);
        }
        Analysis::SurpLength => {
            let opts = QuintAnalysisOptions { nan_empty: true, datatype, ..QuintAnalysisOptions::default() };
            out.surp_length.push(trace_stats_by_surprise_length(session, stimpar, &cfg.quint, &cfg.analysis, &opts)?);
        }
    }
    Ok(())
}
