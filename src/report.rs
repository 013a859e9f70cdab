//! Profile report rendering: console (box-drawing, colored), JSON, and
//! Markdown renderings of a `Snapshot`. See DESIGN.md for what this
//! dropped relative to its forerunner.

use crate::types::{Axis, AxisCode, Snapshot, SophisticationLevel};
use anyhow::Result;
use colored::*;
use std::collections::HashMap;

fn axis_label(axis: &AxisCode, axes_by_code: &HashMap<AxisCode, Axis>) -> String {
    axes_by_code
        .get(axis)
        .map(|a| format!("{} ({} <-> {})", a.name, a.left_pole, a.right_pole))
        .unwrap_or_else(|| axis.to_string())
}

fn level_color(level: SophisticationLevel, text: &str) -> ColoredString {
    match level {
        SophisticationLevel::Autonomous => text.bright_green().bold(),
        SophisticationLevel::Reflective => text.green(),
        SophisticationLevel::Integrated => text.yellow(),
        SophisticationLevel::Deliberative => text.bright_yellow(),
        SophisticationLevel::Reactive => text.red(),
    }
}

fn score_bar(fraction: f64) -> String {
    let filled = (fraction.clamp(0.0, 1.0) * 20.0).round() as usize;
    let empty = 20 - filled;
    let bar: String = "█".repeat(filled);
    let rest: String = "░".repeat(empty);
    if fraction >= 0.75 {
        format!("{}{}", bar.green(), rest.dimmed())
    } else if fraction >= 0.4 {
        format!("{}{}", bar.yellow(), rest.dimmed())
    } else {
        format!("{}{}", bar.red(), rest.dimmed())
    }
}

/// Render a snapshot to the console as a boxed table.
pub fn render_console(snapshot: &Snapshot, axes: &[Axis]) -> Result<()> {
    let axes_by_code: HashMap<AxisCode, Axis> = axes.iter().cloned().map(|a| (a.code.clone(), a)).collect();
    let level = SophisticationLevel::from_score_0_100(snapshot.sophistication.composite_0_100);

    println!();
    println!("{}", "╔══════════════════════════════════════════════════════════════════╗".cyan().bold());
    println!("{}", "║                   MORAL SPECTROMETRY PROFILE                     ║".cyan().bold());
    println!("{}", "╠══════════════════════════════════════════════════════════════════╣".cyan());
    println!(
        "{}  Subject: {:<20}  Run: {}   {}",
        "║".cyan(),
        snapshot.subject.to_string().bright_white(),
        snapshot.run_id.to_string().dimmed(),
        "║".cyan()
    );
    println!("{}", "╠══════════════════════════════════════════════════════════════════╣".cyan());

    println!(
        "{}  {:<42} {:>8} {:>8} {:>6}  {}",
        "║".cyan(),
        "AXIS".bright_white().bold(),
        "b".yellow(),
        "SE(b)".green(),
        "n".white(),
        "║".cyan()
    );
    println!("{}", "╟──────────────────────────────────────────────────────────────────╢".cyan());

    let mut axis_codes: Vec<&AxisCode> = snapshot.axis_scores.keys().collect();
    axis_codes.sort();
    for code in axis_codes {
        let score = &snapshot.axis_scores[code];
        let label = axis_label(code, &axes_by_code);
        let label = if label.len() > 42 { format!("{}...", &label[..39]) } else { label };
        println!(
            "{}  {:<42} {:>8.2} {:>8.3} {:>6}  {}",
            "║".cyan(),
            label,
            score.b,
            score.se_b,
            score.n_items,
            "║".cyan()
        );
    }

    println!("{}", "╠══════════════════════════════════════════════════════════════════╣".cyan());
    println!(
        "{}  {}  {}",
        "║".cyan(),
        "SOPHISTICATION INDEX".bright_white().bold(),
        "║".cyan()
    );
    println!(
        "{}  {} {:>5.1}/100  {}",
        "║".cyan(),
        score_bar(snapshot.sophistication.composite_0_100 / 100.0),
        snapshot.sophistication.composite_0_100,
        "║".cyan()
    );
    println!(
        "{}  Level: {}                                                {}",
        "║".cyan(),
        level_color(level, &format!("{level:?}")),
        "║".cyan()
    );

    println!("{}", "╠══════════════════════════════════════════════════════════════════╣".cyan());
    let gaming = &snapshot.gaming;
    let gaming_text = if gaming.flagged {
        format!("{:.2} (FLAGGED)", gaming.composite).red().bold()
    } else {
        format!("{:.2}", gaming.composite).green()
    };
    println!(
        "{}  Gaming composite: {}                                       {}",
        "║".cyan(),
        gaming_text,
        "║".cyan()
    );

    if !snapshot.coupling.top_strongest.is_empty() {
        println!("{}", "╟──────────────────────────────────────────────────────────────────╢".cyan());
        println!("{}  Strongest couplings:                                              {}", "║".cyan(), "║".cyan());
        for (a, b, rho) in snapshot.coupling.top_strongest.iter().take(3) {
            println!(
                "{}    {} <-> {}: {:.2}                                        {}",
                "║".cyan(),
                a,
                b,
                rho,
                "║".cyan()
            );
        }
    }

    println!("{}", "╠══════════════════════════════════════════════════════════════════╣".cyan());
    println!(
        "{}  Moral Rating: {:.0} (+/- {:.0})  │  Peak: {:.0}  │  Items: {}   {}",
        "║".cyan(),
        snapshot.rating.mr,
        snapshot.rating.uncertainty,
        snapshot.rating.peak,
        snapshot.rating.items_processed,
        "║".cyan()
    );
    println!("{}", "╚══════════════════════════════════════════════════════════════════╝".cyan().bold());
    println!();

    Ok(())
}

/// Render a snapshot as pretty-printed JSON.
pub fn generate_json(snapshot: &Snapshot) -> Result<String> {
    Ok(serde_json::to_string_pretty(snapshot)?)
}

/// Render a snapshot as a Markdown profile report.
pub fn generate_markdown(snapshot: &Snapshot, axes: &[Axis]) -> Result<String> {
    let axes_by_code: HashMap<AxisCode, Axis> = axes.iter().cloned().map(|a| (a.code.clone(), a)).collect();
    let level = SophisticationLevel::from_score_0_100(snapshot.sophistication.composite_0_100);

    let mut md = String::new();
    md.push_str("# Moral Spectrometry Profile\n\n");
    md.push_str(&format!("**Subject:** {}  \n", snapshot.subject));
    md.push_str(&format!("**Run:** {}  \n", snapshot.run_id));
    md.push_str(&format!("**Generated:** {}  \n\n", snapshot.created_at.format("%Y-%m-%d %H:%M UTC")));

    md.push_str("## Axis scores\n\n");
    md.push_str("| Axis | b | SE(b) | n |\n");
    md.push_str("|------|---|-------|---|\n");
    let mut axis_codes: Vec<&AxisCode> = snapshot.axis_scores.keys().collect();
    axis_codes.sort();
    for code in axis_codes {
        let score = &snapshot.axis_scores[code];
        md.push_str(&format!(
            "| {} | {:.2} | {:.3} | {} |\n",
            axis_label(code, &axes_by_code),
            score.b,
            score.se_b,
            score.n_items
        ));
    }

    md.push_str(&format!(
        "\n**Sophistication Index:** {:.1}/100 ({:?})\n\n",
        snapshot.sophistication.composite_0_100, level
    ));
    md.push_str(&format!(
        "**Gaming composite:** {:.2}{}\n\n",
        snapshot.gaming.composite,
        if snapshot.gaming.flagged { " (flagged)" } else { "" }
    ));
    md.push_str(&format!(
        "**Moral Rating:** {:.0} (+/- {:.0}), peak {:.0}, {} items\n\n",
        snapshot.rating.mr, snapshot.rating.uncertainty, snapshot.rating.peak, snapshot.rating.items_processed
    ));

    if !snapshot.coupling.top_strongest.is_empty() {
        md.push_str("## Strongest axis couplings\n\n");
        for (a, b, rho) in &snapshot.coupling.top_strongest {
            md.push_str(&format!("- {a} <-> {b}: {rho:.2}\n"));
        }
        md.push('\n');
    }

    if let Some(warning) = &snapshot.coupling.warning {
        md.push_str(&format!("> {warning}\n"));
    }

    Ok(md)
}
