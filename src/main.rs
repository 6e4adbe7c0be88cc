use anyhow::{Context, Result};
use bidsmap::{
    acquisition_time, check_run, classify, compose_for, discover, increment_run_index, Bidsmap,
    Category, DataSource, ProviderRegistry, RunItem, ScansTable,
};
use std::collections::{btree_map::Entry, BTreeMap};
use std::env;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Extension of the converted images listed in the scans tables
const IMAGE_EXTENSION: &str = ".nii.gz";

const USAGE: &str = "usage:
  bidsmap map <template.yaml> <study.yaml> <source>...
  bidsmap name <study.yaml> <bidsfolder> <source>...";

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = env::args().collect();

    match args.get(1).map(String::as_str) {
        Some("map") if args.len() > 4 => run_map(Path::new(&args[2]), Path::new(&args[3]), &args[4..]),
        Some("name") if args.len() > 4 => run_name(Path::new(&args[2]), Path::new(&args[3]), &args[4..]),
        _ => {
            eprintln!("{}", USAGE);
            std::process::exit(2);
        }
    }
}

/// Add every new source item to the study map
fn run_map(template_path: &Path, study_path: &Path, sources: &[String]) -> Result<()> {
    let template = Bidsmap::load(template_path)
        .with_context(|| format!("Failed to load template: {}", template_path.display()))?;

    let mut study = if study_path.is_file() {
        Bidsmap::load(study_path)?
    } else {
        let mut study = Bidsmap::new();
        study.options = template.options.clone();
        study.plugins = template.plugins.clone();
        study
    };

    let registry = ProviderRegistry::from_plugins(&study.plugins, &study.options)?;
    info!("Using {} provider(s)", registry.provider_count());

    let mut added = 0;
    for source_path in sources {
        let Some(source) = registry.datasource(Path::new(source_path)) else {
            continue;
        };
        if let Some(category) = discover(&mut study, &template, &source) {
            println!("{} -> {}", source.provenance(), category);
            added += 1;
        }
    }

    study.save(study_path)?;
    println!("✓ Added {} run-item(s) to {}", added, study_path.display());
    Ok(())
}

/// Print the output name of every source item and list it in its scans table
fn run_name(study_path: &Path, bids_folder: &Path, sources: &[String]) -> Result<()> {
    let study = Bidsmap::load(study_path)?;
    let registry = ProviderRegistry::from_plugins(&study.plugins, &study.options)?;
    let mut scans: BTreeMap<PathBuf, ScansTable> = BTreeMap::new();

    for source_path in sources {
        let Some(source) = registry.datasource(Path::new(source_path)) else {
            continue;
        };

        let classification = classify(&source, &study);
        if classification.category == Category::Ignore {
            info!("Excluding {}", source.provenance());
            continue;
        }
        if !classification.is_match() {
            warn!("{} is not in the study bidsmap", source.provenance());
        }
        if let Err(errors) = check_run(classification.category, &classification.run) {
            for error in errors {
                warn!("{}", error);
            }
        }

        let Some(section) = study.section(source.dataformat()) else {
            continue;
        };
        let (subject, session) = source.subject_and_session_ids(&section.subject, &section.session, &study.options);
        if subject.is_empty() {
            warn!("No subject identifier for {}", source.provenance());
            continue;
        }

        let run = resolve_deferred(&classification.run, &source);
        let name = compose_for(&subject, &session, classification.category, &run, None);
        let folder = session_folder(bids_folder, &subject, &session);
        let target = folder.join(classification.category.as_str());
        let name = match increment_run_index(&target, &name) {
            Ok(name) => name,
            Err(e) => {
                warn!("Skipping {}: {}", source.provenance(), e);
                continue;
            }
        };

        let table_path = ScansTable::path_for(&folder, &subject, &session);
        let table = match scans.entry(table_path) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let table = ScansTable::load(entry.key())?;
                entry.insert(table)
            }
        };
        table.record(
            format!("{}/{}{}", classification.category, name, IMAGE_EXTENSION),
            acquisition_time(&source),
        );

        println!("{} -> {}", source.provenance(), target.join(name).display());
    }

    for table in scans.values() {
        table.save()?;
    }
    println!("✓ Updated {} scans table(s)", scans.len());
    Ok(())
}

fn resolve_deferred<S: DataSource + ?Sized>(run: &RunItem, source: &S) -> RunItem {
    let mut resolved = run.clone();
    for value in resolved.bids.values_mut() {
        *value = value.resolve_deferred(source).as_str().into();
    }
    resolved
}

fn session_folder(bids_folder: &Path, subject: &str, session: &str) -> PathBuf {
    let mut folder = bids_folder.join(subject);
    if !session.is_empty() {
        folder.push(session);
    }
    folder
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const STUDY: &str = r#"
Plugins: [sidecar]
JSON:
  subject: <<SourceFilePath>>
  session: <<SourceFilePath>>
  anat:
  - provenance: ''
    attributes:
      SeriesDescription: '*MPRAGE*'
    bids:
      suffix: T1w
  func:
  - provenance: ''
    attributes:
      SeriesDescription: '*bold*'
    bids:
      task: <TaskName>
      run: '1'
      suffix: bold
"#;

    #[test]
    fn test_name_skips_unnumbered_collision_and_records_scans() {
        let tmp = TempDir::new().unwrap();
        let raw = tmp.path().join("raw").join("sub-01");
        fs::create_dir_all(&raw).unwrap();
        let t1 = raw.join("t1.json");
        let rest = raw.join("rest.json");
        fs::write(&t1, r#"{"SeriesDescription": "T1_MPRAGE"}"#).unwrap();
        fs::write(
            &rest,
            r#"{"SeriesDescription": "rest_bold", "TaskName": "rest", "AcquisitionTime": "101530"}"#,
        )
        .unwrap();

        let study_path = tmp.path().join("bidsmap.yaml");
        fs::write(&study_path, STUDY).unwrap();

        // The anat name has no run entity to bump
        let bids = tmp.path().join("bids");
        fs::create_dir_all(bids.join("sub-01").join("anat")).unwrap();
        fs::write(bids.join("sub-01").join("anat").join("sub-01_T1w.nii.gz"), b"").unwrap();

        let sources = vec![t1.to_string_lossy().to_string(), rest.to_string_lossy().to_string()];
        run_name(&study_path, &bids, &sources).unwrap();

        let table = ScansTable::load(ScansTable::path_for(&bids.join("sub-01"), "sub-01", "")).unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(
            table.acq_time("func/sub-01_task-rest_run-1_bold.nii.gz"),
            Some("1925-01-01T10:15:30")
        );
    }

    #[test]
    fn test_session_folder() {
        assert_eq!(session_folder(Path::new("/bids"), "sub-01", ""), PathBuf::from("/bids/sub-01"));
        assert_eq!(
            session_folder(Path::new("/bids"), "sub-01", "ses-02"),
            PathBuf::from("/bids/sub-01/ses-02")
        );
    }
}
