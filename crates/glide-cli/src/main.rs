//! `glide-cli` – command line front end for the movement stack.
//!
//! ```text
//! glide config [show]                       print the effective configuration
//! glide config init [--force]               write the effective configuration to disk
//! glide graph                               print the simulated world's graph as JSON
//! glide plan <graph.json> <x,y> <x,y>       plan a path and print the waypoints
//! glide simulate <x,y> [--from <x,y>]       run a move in the simulated world
//! glide act <category> <key>                run one action through the scheduler
//! ```
//!
//! Configuration comes from `~/.glide/config.toml` (or `--config`, see
//! [`config`]) with `GLIDE_*` environment overrides.  Ctrl-C cancels the
//! running move; every held key is released before the process exits.

mod config;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing::warn;

use glide_hal::{SimConfig, SimPlatform, SimWorld};
use glide_kernel::CancelToken;
use glide_runtime::telemetry::init_tracing;
use glide_runtime::{
    ActionCategory, ActionDefinition, ActionOutcome, ActionScheduler, Edge, MoveReport, Mover, PathPlanner, Plan,
    PlatformGraph, Rig, Waypoint,
};
use glide_types::{Key, MoveError, Point, TerminalStatus};

#[derive(Parser)]
#[command(name = "glide")]
#[command(version)]
#[command(about = "Closed-loop movement for a 2D side-scrolling agent")]
#[command(after_help = "Set GLIDE_LOG_FORMAT=json for JSON logs.")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (default: ~/.glide/config.toml)
    #[arg(long, global = true, env = "GLIDE_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show or write the configuration
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },

    /// Print the simulated world's platform graph as JSON
    Graph,

    /// Plan a path over a platform graph and print the waypoints
    Plan {
        /// Graph file (JSON)
        graph: PathBuf,
        /// Start point `x,y`
        #[arg(value_parser = parse_point, allow_hyphen_values = true)]
        start: Point,
        /// Goal point `x,y`
        #[arg(value_parser = parse_point, allow_hyphen_values = true)]
        goal: Point,
    },

    /// Run a move in the simulated world
    #[command(visible_alias = "move")]
    Simulate {
        /// Goal point `x,y`
        #[arg(value_parser = parse_point, allow_hyphen_values = true)]
        goal: Point,
        /// Start point `x,y`
        #[arg(long, value_parser = parse_point, default_value = "20,100")]
        from: Point,
    },

    /// Run one action through the scheduler in the simulated world
    Act {
        /// Action category, e.g. `buff` or `area_attack`
        #[arg(value_parser = parse_category)]
        category: ActionCategory,
        /// Key to tap
        key: String,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration (default)
    Show,
    /// Write the effective configuration to the config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing();

    let cancel = CancelToken::new();
    let on_signal = cancel.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – cancelling and releasing keys …".yellow().bold());
        on_signal.cancel();
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; moves cannot be cancelled");
    }

    let path = cli.config.unwrap_or_else(config::config_path);
    let cfg = match config::load(&path) {
        Ok(cfg) => cfg,
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            config::GlideConfig::default()
        }
    };

    let result = match cli.command {
        Commands::Config { action } => match action.unwrap_or(ConfigAction::Show) {
            ConfigAction::Show => show_config(&cfg, &path),
            ConfigAction::Init { force } => init_config(&cfg, &path, force),
        },
        Commands::Graph => show_graph(),
        Commands::Plan { graph, start, goal } => run_plan(&cfg, &graph, start, goal),
        Commands::Simulate { goal, from } => run_simulate(&cfg, from, goal, cancel),
        Commands::Act { category, key } => run_act(&cfg, category, &key, cancel),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            println!("{} {}", "error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Commands
// ─────────────────────────────────────────────────────────────────────────────

fn show_config(cfg: &config::GlideConfig, path: &Path) -> Result<(), String> {
    println!("  {} {}", "Config file:".bold(), path.display());
    let raw = toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {e}"))?;
    println!("{raw}");
    Ok(())
}

fn init_config(cfg: &config::GlideConfig, path: &Path, force: bool) -> Result<(), String> {
    if path.exists() && !force {
        return Err(format!("{} already exists (use --force to overwrite)", path.display()));
    }
    config::save_to(cfg, path)?;
    println!("  {} {}", "✓ wrote".green(), path.display());
    Ok(())
}

fn show_graph() -> Result<(), String> {
    let graph = graph_for_platforms(&SimConfig::default().platforms).map_err(|e| e.to_string())?;
    println!("{}", graph.to_json().map_err(|e| e.to_string())?);
    Ok(())
}

fn run_plan(cfg: &config::GlideConfig, path: &Path, start: Point, goal: Point) -> Result<(), String> {
    let raw = std::fs::read_to_string(path).map_err(|e| format!("Failed to read {}: {e}", path.display()))?;
    let graph = PlatformGraph::from_json(&raw).map_err(|e| e.to_string())?;
    let planner = PathPlanner::new(Arc::new(graph), cfg.mover.planner);

    match planner.plan(start, goal) {
        Plan::Found(waypoints) => {
            println!("  {} ({} waypoints)", "Path found".green().bold(), waypoints.len());
            for w in &waypoints {
                let anchor = if w.anchor { " [anchor]".dimmed().to_string() } else { String::new() };
                println!("    • #{:<4} {}{}", w.id, w.point(), anchor);
            }
            Ok(())
        }
        Plan::NoPath {
            nearest_reachable,
            reason,
        } => {
            println!("  {} {}", "No path:".yellow().bold(), reason);
            if let Some(w) = nearest_reachable {
                println!("    nearest reachable: #{} {}", w.id, w.point());
            }
            Ok(())
        }
    }
}

fn run_simulate(cfg: &config::GlideConfig, start: Point, goal: Point, cancel: CancelToken) -> Result<(), String> {
    let sim = SimConfig::default();
    let graph = Arc::new(graph_for_platforms(&sim.platforms).map_err(|e| e.to_string())?);
    let world = SimWorld::new(sim, start);
    let mut rig = Rig::simulated(&world, cfg.rig.clone()).with_cancel(cancel);
    let mover = Mover::new(graph, cfg.mover.clone());

    println!("  Simulating move {} → {}", start.to_string().bold(), goal.to_string().bold());
    let report = mover.move_to(&mut rig, goal).map_err(|e| e.to_string())?;
    print_move_report(&report);
    match report.status {
        TerminalStatus::Settled => Ok(()),
        TerminalStatus::Failed(e) => Err(e.to_string()),
    }
}

fn run_act(cfg: &config::GlideConfig, category: ActionCategory, key: &str, cancel: CancelToken) -> Result<(), String> {
    let world = SimWorld::new(SimConfig::default(), Point::new(50.0, 100.0));
    let mut rig = Rig::simulated(&world, cfg.rig.clone()).with_cancel(cancel);
    let mut scheduler = ActionScheduler::new(cfg.scheduler.clone());
    scheduler.register(ActionDefinition::new("cli", category).with_keys(vec![Key::new(key)]));

    let report = scheduler.invoke(&mut rig, "cli").map_err(|e| e.to_string())?;
    let phases: Vec<String> = report.phases.iter().map(|p| format!("{p:?}")).collect();
    println!("  {} {}", "Phases:".bold(), phases.join(" → "));
    println!("  {} {:?}", "Elapsed:".bold(), report.elapsed);
    match report.outcome {
        ActionOutcome::Executed => {
            println!("  {}", "✓ executed".green());
            Ok(())
        }
        ActionOutcome::CoolingDown { remaining } => {
            println!("  {} {:?}", "cooling down for".yellow(), remaining);
            Ok(())
        }
        ActionOutcome::Aborted(e) => Err(e.to_string()),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn parse_category(raw: &str) -> Result<ActionCategory, String> {
    serde_json::from_value(serde_json::Value::String(raw.to_string())).map_err(|_| {
        let names: Vec<String> = ActionCategory::ALL
            .iter()
            .filter_map(|c| serde_json::to_value(c).ok())
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect();
        format!("unknown category `{raw}` (expected one of: {})", names.join(", "))
    })
}

fn parse_point(raw: &str) -> Result<Point, String> {
    let (x, y) = raw
        .split_once(',')
        .ok_or_else(|| format!("expected `x,y`, got `{raw}`"))?;
    let x = x.trim().parse::<f32>().map_err(|e| format!("bad x in `{raw}`: {e}"))?;
    let y = y.trim().parse::<f32>().map_err(|e| format!("bad y in `{raw}`: {e}"))?;
    Ok(Point::new(x, y))
}

/// Navigation graph for a set of simulated platforms.
///
/// Each platform gets nodes near both ends, in the middle, and in the middle
/// of every overlap with another platform.  Overlap nodes of vertically
/// adjacent platforms are linked and marked as anchors.
fn graph_for_platforms(platforms: &[SimPlatform]) -> Result<PlatformGraph, MoveError> {
    const MARGIN: f32 = 10.0;

    let overlap = |a: &SimPlatform, b: &SimPlatform| {
        let lo = a.x_min.max(b.x_min);
        let hi = a.x_max.min(b.x_max);
        (hi - lo > 2.0 * MARGIN).then_some((lo + hi) / 2.0)
    };
    let adjacent = |a: &SimPlatform, b: &SimPlatform, x: f32| {
        let (top, bottom) = if a.y < b.y { (a.y, b.y) } else { (b.y, a.y) };
        !platforms
            .iter()
            .any(|p| p.y > top && p.y < bottom && x >= p.x_min && x <= p.x_max)
    };

    let mut nodes: Vec<Waypoint> = Vec::new();
    let mut edges: Vec<Edge> = Vec::new();
    let mut links: Vec<(usize, usize, f32)> = Vec::new();
    for (i, a) in platforms.iter().enumerate() {
        for (j, b) in platforms.iter().enumerate().skip(i + 1) {
            if let Some(x) = overlap(a, b).filter(|x| (a.y - b.y).abs() > f32::EPSILON && adjacent(a, b, *x)) {
                links.push((i, j, x));
            }
        }
    }

    for (i, p) in platforms.iter().enumerate() {
        let mut xs = vec![p.x_min + MARGIN, (p.x_min + p.x_max) / 2.0, p.x_max - MARGIN];
        xs.extend(links.iter().filter(|(a, b, _)| *a == i || *b == i).map(|(_, _, x)| *x));
        xs.sort_by(f32::total_cmp);
        let ids: Vec<u32> = xs.into_iter().map(|x| node_at(&mut nodes, x, p.y, false)).collect();
        for pair in ids.windows(2) {
            if pair[0] != pair[1] {
                edges.push(Edge {
                    from: pair[0],
                    to: pair[1],
                    weight: None,
                    bidirectional: true,
                });
            }
        }
    }
    for (i, j, x) in links {
        let a = node_at(&mut nodes, x, platforms[i].y, true);
        let b = node_at(&mut nodes, x, platforms[j].y, true);
        edges.push(Edge {
            from: a,
            to: b,
            weight: None,
            bidirectional: true,
        });
    }

    PlatformGraph::new(nodes, edges)
}

/// Id of the node at `(x, y)`, creating it if no node lies within 2px.
fn node_at(nodes: &mut Vec<Waypoint>, x: f32, y: f32, anchor: bool) -> u32 {
    if let Some(w) = nodes
        .iter_mut()
        .find(|w| (w.y - y).abs() < f32::EPSILON && (w.x - x).abs() < 2.0)
    {
        w.anchor |= anchor;
        return w.id;
    }
    let id = nodes.len() as u32;
    nodes.push(Waypoint { id, x, y, anchor });
    id
}

fn print_move_report(report: &MoveReport) {
    let status = match &report.status {
        TerminalStatus::Settled => "settled".green().bold().to_string(),
        TerminalStatus::Failed(e) => format!("{} ({e})", "failed".red().bold()),
    };
    println!("  {} {}", "Run:".bold(), report.run_id.to_string().dimmed());
    println!("  {} {}", "Status:".bold(), status);
    println!("  {} {}", "Position:".bold(), report.position);
    println!(
        "  {} {} waypoints, {} skill steps, {} step retries, {} re-plans",
        "Route:".bold(),
        report.waypoints_visited,
        report.skill_steps,
        report.step_retries,
        report.replans
    );
    if let Some(adjust) = &report.adjust {
        println!(
            "  {} {} ticks, {} corrections, {} vertical attempts ({} failed), {} key presses",
            "Adjust:".bold(),
            adjust.ticks,
            adjust.x_corrections,
            adjust.vertical_attempts,
            adjust.vertical_failures,
            adjust.key_presses
        );
    }
    println!("  {} {:.2}s (simulated)", "Elapsed:".bold(), report.elapsed.as_secs_f32());
}
