use std::io::{self, BufRead, Write};

use anyhow::{anyhow, bail, Context, Result};
use client_core::{
    CollectionBackend, CollectionController, ControllerError, Direction, FilterCriteria,
    HttpBackend, Notification, RecordKey, SaveTarget,
};
use serde_json::{Map, Value};
use shared::{domain::Entity, entities::ApplicantStatus, protocol::ListQuery};
use tokio::sync::broadcast;
use tracing::debug;
use url::Url;

use crate::{Command, Step};

type Controller<R> = CollectionController<R, HttpBackend<R>>;

pub(crate) async fn run<R: Entity>(backend_url: Url, command: Command) -> Result<()> {
    let backend = HttpBackend::<R>::new(backend_url)?;
    let mut controller = CollectionController::new(backend);
    let mut notifications = controller.subscribe();
    debug!(collection = %R::KIND, ?command, "running admin command");

    let outcome = execute(&mut controller, command).await;
    print_notifications(&mut notifications);
    outcome
}

async fn execute<R: Entity>(controller: &mut Controller<R>, command: Command) -> Result<()> {
    match command {
        Command::List {
            search,
            category,
            location,
            status,
            active_only,
        } => {
            if let Some(status) = &status {
                status
                    .parse::<ApplicantStatus>()
                    .map_err(|err| anyhow!(err))?;
            }
            controller.set_query(ListQuery {
                status,
                ..ListQuery::default()
            });
            controller.load().await?;

            let criteria = FilterCriteria {
                search,
                category,
                location,
                active_only,
            };
            let matching = controller.filter(&criteria);
            for entry in &matching {
                println!("{}", describe(entry.record()));
            }
            println!("{} of {} {}", matching.len(), controller.len(), R::KIND);
        }
        Command::Show { slug } => {
            let record = controller.backend().fetch(&slug).await?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        Command::Create { fields } => {
            controller.load().await?;
            let key = controller.add_draft();
            let merged = merge_fields(&R::default(), fields)?;
            controller.update_draft(key, |record| {
                let order = record.order();
                *record = merged;
                record.set_order(order);
            })?;
            let target = controller.save_target_for(key);
            controller.save(target).await?;
        }
        Command::Edit { slug, fields } => {
            let key = load_and_find(controller, &slug).await?;
            let current = controller
                .entry(key)
                .map(|entry| entry.record().clone())
                .ok_or(ControllerError::UnknownRecord(key))?;
            let merged = merge_fields(&current, fields)?;
            controller.update_draft(key, |record| *record = merged)?;
            let target = controller.save_target_for(key);
            controller.save(target).await?;
        }
        Command::Toggle { slug, yes } => {
            let key = load_and_find(controller, &slug).await?;
            let prompt = controller.request_toggle_active(key)?;
            confirm_or_cancel(controller, &prompt.summary, yes).await?;
        }
        Command::Delete { slug, yes } => {
            let key = load_and_find(controller, &slug).await?;
            let prompt = controller.request_delete(key)?;
            confirm_or_cancel(controller, &prompt.summary, yes).await?;
        }
        Command::Move { slug, direction } => {
            let key = load_and_find(controller, &slug).await?;
            let direction = match direction {
                Step::Up => Direction::Up,
                Step::Down => Direction::Down,
            };
            if !controller.reorder(key, direction)? {
                println!("'{slug}' is already at that end of {}", R::KIND);
                return Ok(());
            }
            controller.save(SaveTarget::Collection).await?;
        }
        Command::Status { slug, status } => {
            if R::KIND.status_field().is_none() {
                bail!("{} have no review status", R::KIND);
            }
            let status = status
                .parse::<ApplicantStatus>()
                .map_err(|err| anyhow!(err))?;
            let key = load_and_find(controller, &slug).await?;
            let mut fields = Map::new();
            fields.insert("status".to_string(), Value::from(status.as_str()));
            controller.patch(key, fields).await?;
            println!("'{slug}' is now {}", status.as_str());
        }
        Command::SetImage { slug, url } => {
            let key = load_and_find(controller, &slug).await?;
            controller.apply_uploaded_image(key, url)?;
            let target = controller.save_target_for(key);
            controller.save(target).await?;
        }
    }
    Ok(())
}

async fn load_and_find<R: Entity>(
    controller: &mut Controller<R>,
    slug: &str,
) -> Result<RecordKey> {
    controller.load().await?;
    controller
        .entries()
        .iter()
        .find(|entry| entry.record().slug() == slug)
        .map(|entry| entry.key())
        .with_context(|| format!("no {} with slug '{slug}'", R::KIND.label()))
}

async fn confirm_or_cancel<R: Entity>(
    controller: &mut Controller<R>,
    summary: &str,
    assume_yes: bool,
) -> Result<()> {
    if assume_yes || ask(summary)? {
        controller.confirm().await?;
    } else {
        controller.cancel_confirmation();
        println!("cancelled");
    }
    Ok(())
}

fn ask(question: &str) -> Result<bool> {
    print!("{question} [y/N] ");
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}

fn merge_fields<R: Entity>(base: &R, fields: Vec<(String, Value)>) -> Result<R> {
    let mut value = serde_json::to_value(base)?;
    let Value::Object(map) = &mut value else {
        bail!("{} did not serialize to an object", R::KIND.label());
    };
    for (name, field) in fields {
        if name == "id" {
            bail!("the id of a record cannot be changed");
        }
        map.insert(name, field);
    }
    serde_json::from_value(value)
        .with_context(|| format!("fields do not describe a valid {}", R::KIND.label()))
}

fn describe<R: Entity>(record: &R) -> String {
    let id = record
        .id()
        .map(|id| id.to_string())
        .unwrap_or_else(|| "-".to_string());
    format!(
        "{:>4} {:>5} {} {:<24} {}",
        record.order(),
        id,
        if record.active() { "on " } else { "off" },
        record.slug(),
        record.display_name()
    )
}

fn print_notifications(notifications: &mut broadcast::Receiver<Notification>) {
    while let Ok(notification) = notifications.try_recv() {
        match notification {
            Notification::Success(message) => println!("{message}"),
            // Failures also come back as the command's error.
            Notification::Error(_) => {}
        }
    }
}
