use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Package as written in configuration. The duration may be given either as
/// minutes or as free text ("2 horas", "30 min", "1 día").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageConfig {
    pub id: String,
    pub name: String,
    pub price: i64,
    pub duration: DurationSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DurationSpec {
    Minutes(i64),
    Text(String),
}

impl DurationSpec {
    pub fn to_minutes(&self) -> Option<i64> {
        match self {
            DurationSpec::Minutes(m) if *m > 0 => Some(*m),
            DurationSpec::Minutes(_) => None,
            DurationSpec::Text(text) => normalize_duration(text),
        }
    }
}

/// A purchasable package with its duration already normalised.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Package {
    pub id: String,
    pub name: String,
    pub price: i64,
    pub duration_minutes: i64,
}

#[derive(Debug, Clone, Default)]
pub struct PackageCatalog {
    packages: HashMap<String, Package>,
    order: Vec<String>,
}

impl PackageCatalog {
    pub fn from_config(configs: &[PackageConfig]) -> Result<Self> {
        let mut catalog = PackageCatalog::default();

        for cfg in configs {
            let duration_minutes = cfg.duration.to_minutes().ok_or_else(|| {
                AppError::Validation(format!(
                    "Package '{}' has an unrecognised duration: {:?}",
                    cfg.id, cfg.duration
                ))
            })?;

            if cfg.price <= 0 {
                return Err(AppError::Validation(format!(
                    "Package '{}' must have a positive price",
                    cfg.id
                )));
            }

            if catalog.packages.contains_key(&cfg.id) {
                return Err(AppError::Validation(format!(
                    "Duplicate package id '{}'",
                    cfg.id
                )));
            }

            catalog.order.push(cfg.id.clone());
            catalog.packages.insert(
                cfg.id.clone(),
                Package {
                    id: cfg.id.clone(),
                    name: cfg.name.clone(),
                    price: cfg.price,
                    duration_minutes,
                },
            );
        }

        Ok(catalog)
    }

    pub fn get(&self, id: &str) -> Option<&Package> {
        self.packages.get(id)
    }

    pub fn list(&self) -> Vec<Package> {
        self.order
            .iter()
            .filter_map(|id| self.packages.get(id).cloned())
            .collect()
    }
}

/// Parse a human duration into whole minutes. Returns `None` for anything
/// unrecognised or non-positive.
pub fn normalize_duration(text: &str) -> Option<i64> {
    let text = text.trim().to_lowercase();
    let split = text
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == ','))
        .unwrap_or(text.len());
    let (number, unit) = text.split_at(split);
    let value: f64 = number.replace(',', ".").parse().ok()?;

    let factor = match unit.trim() {
        "" | "m" | "min" | "mins" | "minuto" | "minutos" | "minute" | "minutes" => 1.0,
        "h" | "hr" | "hrs" | "hora" | "horas" | "hour" | "hours" => 60.0,
        "d" | "dia" | "dias" | "día" | "días" | "day" | "days" => 1440.0,
        "w" | "semana" | "semanas" | "week" | "weeks" => 10080.0,
        _ => return None,
    };

    let minutes = (value * factor).round() as i64;
    if minutes > 0 {
        Some(minutes)
    } else {
        None
    }
}
