//! Terminal rendering of a model summary.

use owo_colors::OwoColorize;
use unet_model::{ModelSummary, StageKind, SummaryRow};

/// Print the summary as a boxed, colored table
pub fn print(summary: &ModelSummary) {
    println!();
    println!(
        "{}",
        "╔══════════════════════════════════════════════════════════════╗".bright_white()
    );
    println!(
        "{}",
        format!("║ {:60} ║", format!("Model: {}   Input: {}", summary.name, summary.input))
            .bright_white()
            .bold()
    );
    println!(
        "{}",
        "╠══════════════╤════════════╤══════════════════╤═══════════════╣".bright_white()
    );
    println!(
        "{}",
        format!(
            "║ {:12} │ {:10} │ {:16} │ {:>13} ║",
            "Stage", "Kind", "Output [C,H,W]", "Params"
        )
        .bright_white()
    );
    println!(
        "{}",
        "╟──────────────┼────────────┼──────────────────┼───────────────╢".bright_white()
    );

    for row in &summary.rows {
        print_row(row);
    }

    println!(
        "{}",
        "╠══════════════╧════════════╧══════════════════╧═══════════════╣".bright_white()
    );
    println!(
        "{}",
        format!("║ {:60} ║", format!("Total params: {}", group_digits(summary.total_params)))
            .bright_white()
            .bold()
    );
    println!(
        "{}",
        format!(
            "║ {:60} ║",
            format!("Trainable params: {}", group_digits(summary.trainable_params))
        )
        .bright_white()
    );
    println!(
        "{}",
        format!(
            "║ {:60} ║",
            format!("Non-trainable params: {}", group_digits(summary.non_trainable_params))
        )
        .dimmed()
    );
    println!(
        "{}",
        "╚══════════════════════════════════════════════════════════════╝".bright_white()
    );
    println!();
}

fn print_row(row: &SummaryRow) {
    let [c, h, w] = row.output_shape;
    println!(
        "║ {:12} │ {} │ {:16} │ {:>13} ║",
        row.name,
        colored_kind(row.kind),
        format!("[{c}, {h}, {w}]"),
        group_digits(row.params)
    );
}

fn colored_kind(kind: StageKind) -> String {
    let padded = format!("{:10}", kind.name());
    match kind {
        StageKind::Encoder => padded.cyan().to_string(),
        StageKind::Bottleneck => padded.magenta().bold().to_string(),
        StageKind::Decoder => padded.green().to_string(),
        StageKind::Output => padded.yellow().bold().to_string(),
    }
}

/// Format a count with thousands separators
fn group_digits(n: usize) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}
