use ips_locator::tracking::{AnchorId, TagId};
use ips_locator::utils::init_logging;
use ips_locator::{
    AnchorUpdate, AnchorUpdateHandler, AppConfig, ConfigurationManager, InMemoryTagStore, Point2D,
    PositionEstimator,
};
use serde::Deserialize;
use std::collections::HashMap;

/// Scenario file: tags with their anchors, then a stream of distance updates
#[derive(Debug, Deserialize)]
struct ScenarioJson {
    tags: Vec<TagJson>,
    #[serde(default)]
    updates: Vec<UpdateJson>,
}

#[derive(Debug, Deserialize)]
struct TagJson {
    name: String,
    anchors: Vec<Point2D>,
}

/// Anchors are addressed by `tag` name and their index within that tag
#[derive(Debug, Deserialize)]
struct UpdateJson {
    tag: String,
    anchor: usize,
    distance: f64,
    #[serde(default)]
    position: Option<Point2D>,
}

fn demo_scenario() -> ScenarioJson {
    let anchors = vec![
        Point2D::new(0.0, 0.0),
        Point2D::new(10.0, 0.0),
        Point2D::new(0.0, 10.0),
    ];
    let walk = [
        Point2D::new(3.0, 4.0),
        Point2D::new(3.5, 4.5),
        Point2D::new(4.0, 5.0),
    ];

    let mut updates = Vec::new();
    for truth in walk {
        for (index, anchor) in anchors.iter().enumerate() {
            updates.push(UpdateJson {
                tag: "demo".to_string(),
                anchor: index,
                distance: anchor.distance_to(&truth),
                position: None,
            });
        }
    }

    ScenarioJson {
        tags: vec![TagJson {
            name: "demo".to_string(),
            anchors,
        }],
        updates,
    }
}

fn run_scenario(
    scenario: ScenarioJson,
    config: AppConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut store = InMemoryTagStore::new(config.round_persisted);
    let mut layout: HashMap<String, (TagId, Vec<AnchorId>)> = HashMap::new();

    for tag in &scenario.tags {
        let tag_id = store.create_tag(tag.name.clone());
        let anchor_ids = tag
            .anchors
            .iter()
            .map(|p| store.add_anchor(tag_id, *p))
            .collect::<Result<Vec<_>, _>>()?;
        layout.insert(tag.name.clone(), (tag_id, anchor_ids));
    }

    let estimator = PositionEstimator::new(config.estimator)?;
    let mut handler = AnchorUpdateHandler::new(estimator, store);

    for update in scenario.updates {
        let (_, anchor_ids) = layout
            .get(&update.tag)
            .ok_or_else(|| format!("unknown tag '{}' in update", update.tag))?;
        let anchor_id = *anchor_ids.get(update.anchor).ok_or_else(|| {
            format!("tag '{}' has no anchor #{}", update.tag, update.anchor)
        })?;

        match handler.apply_update(AnchorUpdate {
            anchor_id,
            distance: update.distance,
            position: update.position,
        }) {
            Ok(outcome) => println!(
                "{:<12} anchor #{:<3} d={:>8.3}  ->  x={:>8.2} y={:>8.2}  rms={:.4}{}",
                update.tag,
                update.anchor,
                update.distance,
                outcome.stored.x,
                outcome.stored.y,
                outcome.report.rms_residual,
                if outcome.report.converged { "" } else { "  (not converged)" }
            ),
            Err(e) => eprintln!(
                "{:<12} anchor #{:<3} update failed: {}{}",
                update.tag,
                update.anchor,
                e,
                if e.is_recoverable() { " (next reading may recover)" } else { "" }
            ),
        }
    }

    println!();
    for tag in handler.store().tags() {
        println!(
            "{} (tag {}): x={:.2}, y={:.2}, anchors={}",
            tag.name, tag.id, tag.position.x, tag.position.y, tag.anchor_count
        );
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();
    let program = args.first().map_or("ips_locator", |s| s.as_str());

    let (scenario_path, config_path) = match args.len() {
        1 => (None, None),
        2 if args[1] == "--demo" => (None, None),
        2 => (Some(args[1].clone()), None),
        3 => (Some(args[1].clone()), Some(args[2].clone())),
        _ => {
            eprintln!("Usage: {} [scenario.json [config.json]]", program);
            eprintln!("   or: {} --demo", program);
            return Err("Invalid arguments".into());
        }
    };

    let manager = match &config_path {
        Some(path) => ConfigurationManager::from_file(path)?,
        None => ConfigurationManager::new(),
    };
    init_logging(&manager.config().log_level);

    let scenario = match scenario_path {
        Some(path) => serde_json::from_str(&std::fs::read_to_string(path)?)?,
        None => demo_scenario(),
    };

    run_scenario(scenario, manager.config().clone())
}
