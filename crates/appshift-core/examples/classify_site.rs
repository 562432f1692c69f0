//! Basic usage example - classify a namespace and preview a migration

use appshift::{Classification, Result, Selection, ShiftApi};

fn main() -> Result<()> {
    let mut args = std::env::args().skip(1);
    let path = args.next().unwrap_or_else(|| "./example-site".to_string());
    let source = args.next().unwrap_or_else(|| "legacy".to_string());
    let target = args.next();

    println!("Opening site at: {}", path);
    let api = ShiftApi::builder(&path).auto_create_dirs(true).build()?;

    let report = api.classify_namespace(&source)?;
    println!("{} entities touch {}:", report.entities.len(), source);
    for label in [
        Classification::Standard,
        Classification::Customized,
        Classification::Custom,
        Classification::Orphan,
    ] {
        println!("  {:<10} {}", label, report.count(label));
    }

    let Some(target) = target else {
        return Ok(());
    };

    let plan = api.plan(&source, &target, &Selection::Namespace)?;
    let preview = api.dry_run(&plan)?;
    println!(
        "Plan {}: {} units, {} would run, {} would be skipped, {} excluded",
        plan.id,
        plan.units.len(),
        preview.completed,
        preview.skipped,
        plan.exclusions.len()
    );
    for unit in &plan.units {
        println!("  [rank {}] {} (risk {})", unit.rank, unit.id, unit.risk);
    }

    Ok(())
}
