use std::fmt::Write;

use crate::aggregate::{BatchSummary, SummaryStatus};
use crate::dashboard::{Dashboard, Section};
use crate::details::DetailRecord;
use crate::listing::BatchRow;
use crate::navigation::{DetailContext, SummaryContext};

pub fn render_summary(ctx: &SummaryContext, summary: &BatchSummary) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Summary for Batch: {}", ctx.batch_name);
    let _ = writeln!(output, "Batch ID: {}", ctx.batch_id);
    let _ = writeln!(output, "Doctor: {}", ctx.doctor_name);
    let _ = writeln!(output, "Patient: {}", ctx.patient_name);
    let _ = writeln!(output, "Model: {}", ctx.model_display());
    let _ = writeln!(output, "Time Created: {}", ctx.time_created);
    let _ = writeln!(output);

    match &summary.status {
        SummaryStatus::FetchFailed(reason) => {
            let _ = writeln!(output, "Could not load images for this batch: {reason}");
        }
        SummaryStatus::Empty => {
            let _ = writeln!(output, "This batch has no images.");
        }
        SummaryStatus::Loaded => {
            let _ = writeln!(output, "| Cell Type | Frequency | Average Confidence |");
            let _ = writeln!(output, "|---|---|---|");
            for aggregate in &summary.aggregates {
                let _ = writeln!(
                    output,
                    "| {} | {} | {:.2} |",
                    aggregate.label,
                    aggregate.count,
                    aggregate.average_confidence()
                );
            }
        }
    }

    output
}

pub fn render_details(ctx: &DetailContext, records: &[DetailRecord]) -> String {
    let mut output = String::new();
    let _ = writeln!(output, "# Details for Cell Type: {}", ctx.class_label);
    let _ = writeln!(output);

    if records.is_empty() {
        let _ = writeln!(output, "No images with this prediction.");
        return output;
    }

    let _ = writeln!(output, "| Image ID | File | Confidence | Class Index |");
    let _ = writeln!(output, "|---|---|---|---|");
    for record in records {
        let _ = writeln!(
            output,
            "| {} | {} | {} | {} |",
            record.image_id,
            record.file_name,
            record.confidence_label(),
            record.class_index
        );
    }
    output
}

pub fn render_batches(rows: &[BatchRow]) -> String {
    let mut output = String::new();
    let _ = writeln!(output, "# View Batches");

    if rows.is_empty() {
        let _ = writeln!(output, "No batches found.");
        return output;
    }

    for row in rows {
        let _ = writeln!(
            output,
            "- {} ({}) created {} for {} by {} [{}]",
            row.batch_name,
            row.batch_id,
            row.time_created,
            row.patient_name,
            row.doctor_name,
            row.model_used
        );
    }
    output
}

pub fn render_dashboard(dashboard: &Dashboard) -> String {
    let mut output = String::new();
    let _ = writeln!(output, "{} [{}]", dashboard.full_name, dashboard.initials);
    let _ = writeln!(output, "{}", dashboard.email);
    let _ = writeln!(output, "Role: {}", dashboard.role_label());

    for section in &dashboard.sections {
        let title = match section {
            Section::Upload => "Upload Files",
            Section::PatientBatches => "Patient Batches",
            Section::OwnRecords => "Your Medical Records",
        };
        let _ = writeln!(output, "- {title}");
    }
    output
}

/// CSV of class, frequency and average confidence in display order.
pub fn write_summary_csv<W: std::io::Write>(writer: W, summary: &BatchSummary) -> csv::Result<()> {
    let mut csv = csv::Writer::from_writer(writer);
    csv.write_record(["cell_type", "frequency", "average_confidence"])?;
    for aggregate in &summary.aggregates {
        csv.write_record([
            aggregate.label.clone(),
            aggregate.count.to_string(),
            format!("{:.2}", aggregate.average_confidence()),
        ])?;
    }
    csv.flush()?;
    Ok(())
}
