//! Pipeline stages and the driver that sequences them.

pub mod aggregate;
pub mod audit;
pub mod derive;
pub mod enrich;
pub mod harmonize;
pub mod reciprocity;
pub mod validate;

use std::path::PathBuf;

use serde_json::json;
use tracing::{info, info_span};

use crate::config::Config;
use crate::constants::{
    OUTPUT_AUDIT, OUTPUT_DROPPED, OUTPUT_PANEL, OUTPUT_PCT_CHANGE, OUTPUT_VARIATION,
    OUTPUT_VARIATION_RECIP,
};
use crate::domain::FlowRecord;
use crate::error::Result;
use crate::io::output::OutputWriter;
use crate::io::tabular;
use crate::pipeline::aggregate::{GroupBy, ValueColumn};
use crate::pipeline::audit::AuditLog;
use crate::pipeline::enrich::{EnrichedRecord, EnrichmentTables};
use crate::pipeline::harmonize::Harmonizer;
use crate::pipeline::reciprocity::SensitivityEntry;
use crate::reference::ReferenceRepository;

/// Counts reported back to the CLI after a run.
#[derive(Debug)]
pub struct RunSummary {
    pub panel_rows: usize,
    pub dropped_rows: usize,
    pub cross_date_rows: usize,
    pub audit_entries: usize,
    pub outputs: Vec<PathBuf>,
}

/// Sequences the stages: harmonize, resolve, validate, reciprocity,
/// enrich, bin, derive, aggregate, write. Stage errors carry their own
/// severity; the driver only decides what is fatal, it never papers over.
pub struct Driver {
    config: Config,
    repo: ReferenceRepository,
}

impl Driver {
    pub fn new(config: Config) -> Result<Self> {
        let repo = ReferenceRepository::from_embedded()?;
        Ok(Self { config, repo })
    }

    /// Read, harmonize, and validate the raw export for one collection
    /// date label. Shared by `run` and `sensitivity`.
    fn prepare(&self, date: &str) -> Result<(Vec<FlowRecord>, Vec<FlowRecord>, AuditLog)> {
        let span = info_span!("prepare", date);
        let _guard = span.enter();

        let filename = self.config.harmonize.raw_file_pattern.replace("{date}", date);
        let table = tabular::read_csv(&self.config.raw_path(&filename))?;
        let harmonizer = Harmonizer::new(&table, self.config.harmonize.category)?;
        let rows = harmonizer.harmonize(&table)?;

        let mut audit = AuditLog::default();
        let rows = validate::check_integral_counts(rows, self.config.validation.mode, &mut audit)?;
        let (records, resolve_audit) = harmonize::resolve_rows(rows, &self.repo);
        audit.merge(resolve_audit);

        let outcome = validate::validate(records, &self.config.validation)?;
        audit.merge(outcome.audit);
        let mut records = outcome.records;
        reciprocity::flag_reciprocals(&mut records, &self.config.reciprocity.excluded_dates);
        Ok((records, outcome.dropped, audit))
    }

    pub fn run(&self, date: &str, group_exports: bool) -> Result<RunSummary> {
        let (records, dropped, mut audit) = self.prepare(date)?;

        let tables = EnrichmentTables::load(&self.config, &self.repo, &mut audit)?;
        let mut panel = enrich::enrich(records, &tables);
        aggregate::apply_gdp_bins(&mut panel)?;
        derive::net_migration(&mut panel);
        derive::flow_ranks(&mut panel);

        let pct_rows = derive::pct_change(&panel);
        let variation_rows = aggregate::variation(&panel, GroupBy::Dyad, &ValueColumn::ALL)?;
        let reciprocal_panel: Vec<EnrichedRecord> = panel
            .iter()
            .filter(|r| r.flow.cross_date_reciprocal)
            .cloned()
            .collect();
        let recip_variation = aggregate::variation(&reciprocal_panel, GroupBy::Dyad, &ValueColumn::ALL)?;

        let writer = OutputWriter::new(&self.config.directories.output)?;
        let mut outputs = Vec::new();
        outputs.push(writer.save_csv(
            OUTPUT_PANEL,
            &EnrichedRecord::csv_headers(),
            &panel.iter().map(EnrichedRecord::to_csv_row).collect::<Vec<_>>(),
        )?);
        outputs.push(save_variation(&writer, OUTPUT_VARIATION, &variation_rows)?);
        outputs.push(save_variation(&writer, OUTPUT_VARIATION_RECIP, &recip_variation)?);
        outputs.push(writer.save_csv(
            OUTPUT_PCT_CHANGE,
            &derive::PctChangeRow::csv_headers(),
            &pct_rows.iter().map(derive::PctChangeRow::to_csv_row).collect::<Vec<_>>(),
        )?);
        outputs.push(save_dropped(&writer, &dropped)?);

        if group_exports {
            for group in [GroupBy::GdpBin, GroupBy::Midregion, GroupBy::Subregion] {
                let rows = aggregate::variation(&reciprocal_panel, group, &ValueColumn::ALL)?;
                let name = format!("{}_{}", OUTPUT_VARIATION, group.label());
                outputs.push(save_variation(&writer, &name, &rows)?);
            }
        }

        let report = json!({
            "collection_date": date,
            "panel_rows": panel.len(),
            "dropped_rows": dropped.len(),
            "interventions": audit.to_json(),
        });
        outputs.push(writer.save_json(OUTPUT_AUDIT, &report)?);

        let summary = RunSummary {
            panel_rows: panel.len(),
            dropped_rows: dropped.len(),
            cross_date_rows: reciprocal_panel.len(),
            audit_entries: audit.len(),
            outputs,
        };
        info!(
            panel = summary.panel_rows,
            dropped = summary.dropped_rows,
            cross_date = summary.cross_date_rows,
            "run complete"
        );
        Ok(summary)
    }

    /// Leave-one-date-out reciprocity diagnostic; writes nothing.
    pub fn sensitivity(&self, date: &str) -> Result<Vec<SensitivityEntry>> {
        let (records, _, _) = self.prepare(date)?;
        Ok(reciprocity::sensitivity(
            &records,
            &self.config.reciprocity.excluded_dates,
        ))
    }
}

fn save_variation(
    writer: &OutputWriter,
    name: &str,
    rows: &[aggregate::VariationRow],
) -> Result<PathBuf> {
    writer.save_csv(
        name,
        &aggregate::VariationRow::csv_headers(),
        &rows.iter().map(aggregate::VariationRow::to_csv_row).collect::<Vec<_>>(),
    )
}

fn save_dropped(writer: &OutputWriter, dropped: &[FlowRecord]) -> Result<PathBuf> {
    let rows: Vec<Vec<String>> = dropped
        .iter()
        .map(|record| {
            vec![
                record.origin.to_string(),
                record.destination.to_string(),
                record.collection_date.to_string(),
                record.flow.to_string(),
                record.users_origin.to_string(),
                record.users_destination.to_string(),
            ]
        })
        .collect();
    writer.save_csv(
        OUTPUT_DROPPED,
        &["country_orig", "country_dest", "query_date", "flow", "users_orig", "users_dest"],
        &rows,
    )
}
