/// session_info: load one session directory and print its alignment, block
/// layout, ROI summary and the diagnostics raised while building it.
use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

use calcium_quint::{io::read_json, load_session, ConfigFile, DiagnosticKind, GroupBy, QueryOptions, SegmentCriteria, TraceKind};

#[derive(Parser, Debug)]
#[command(name = "session_info", about = "Summarise an aligned two-photon session")]
struct Args {
    /// Session directory.
    session: PathBuf,

    /// JSON config file (only the `session` section is used).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Also list active ROIs per stimulus.
    #[arg(long)]
    active: bool,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    let cfg: ConfigFile = match &args.config {
        Some(path) => read_json(path)?,
        None => ConfigFile::default(),
    };

    let loaded = load_session(&args.session, &cfg.session)?;
    let sess = &loaded.value;
    let meta = sess.metadata();
    let al = sess.alignment();

    println!(
        "Session {} (mouse {}, {} {}, {} µm, session {})",
        meta.session_id, meta.mouse_n, meta.line, meta.layer, meta.depth, meta.sess_n
    );
    println!(
        "  frames      stim {} @ {} Hz | 2p {} @ {:.2} Hz | pupil {} @ {:.2} Hz",
        al.n_stim_frames(),
        al.stim_fps(),
        al.n_twop_frames(),
        al.twop_fps(),
        al.n_pupil_frames(),
        al.pupil_fps()
    );
    println!(
        "  dropped     {:.4}% of stimulus frames, {} repaired 2p gap(s)",
        al.dropped_prop() * 100.0,
        al.n_repaired_gaps()
    );

    // ── Stimuli ────────────────────────────────────────────────────────────
    for stim in sess.stimuli() {
        let kind = stim.kind_params.kind();
        let view = sess.stim(kind)?;
        let surp = view
            .segments(&SegmentCriteria::default().surprise(true), GroupBy::Flat, QueryOptions { empty_ok: true, ..QueryOptions::default() })?
            .count();
        let all = view
            .segments(&SegmentCriteria::default(), GroupBy::Flat, QueryOptions::default())
            .with_context(|| format!("{kind}: no segments in blocks"))?
            .count();
        println!(
            "  {kind:<10}  {} part(s), {} / {} block(s), {all} segment(s), {surp} surprise, {:.1} extra",
            stim.n_parts, stim.act_n_blocks, stim.exp_n_blocks, stim.extra_segs
        );
        for (d, disp) in stim.blocks.iter().enumerate() {
            for (b, block) in disp.iter().enumerate() {
                println!(
                    "    [{d}.{b}] segs {:>5}..{:<5} stim {:>6}..{:<6} 2p {:>6}..{:<6} par1 {:?} par2 {:?}",
                    block.seg_range.start,
                    block.seg_range.end,
                    block.stim_frames.start,
                    block.stim_frames.end,
                    block.twop_frames.start,
                    block.twop_frames.end,
                    block.params.par1,
                    block.params.par2
                );
            }
        }
    }
    let gs = sess.grayscreen();
    println!("  grayscreen  {} interval(s), {} 2p frame(s)", gs.len(), gs.total_twop_frames());

    // ── Behaviour and ROIs ─────────────────────────────────────────────────
    let run = sess.running().values(false);
    let n_nan = run.iter().filter(|v| v.is_nan()).count();
    println!("  running     {} sample(s), {n_nan} NaN", run.len());
    match sess.pupil() {
        Ok(p) => println!("  pupil       {} sample(s)", p.len()),
        Err(_) => println!("  pupil       none"),
    }
    println!(
        "  ROIs        {} ({} with NaN/Inf in dF/F)",
        sess.n_rois(),
        sess.nan_rois(TraceKind::Dff).len()
    );
    if args.active {
        for stim in sess.stimuli() {
            let kind = stim.kind_params.kind();
            let active = sess.active_rois(TraceKind::Dff, Some(kind))?;
            println!("  active      {kind}: {} ROI(s)", active.len());
        }
    }

    // ── Diagnostics ────────────────────────────────────────────────────────
    if loaded.diagnostics.is_empty() {
        println!("  no diagnostics");
    } else {
        println!(
            "  {} diagnostic(s), {} about dropped frames:",
            loaded.diagnostics.len(),
            loaded.diagnostics.of_kind(DiagnosticKind::DroppedFrames).count()
        );
        for d in loaded.diagnostics.iter() {
            println!("    {d}");
        }
    }
    Ok(())
}
