use crate::{EventStore, StorageError};
use pitstop_core::inspection_contracts::TeamIdentity;
use rusqlite::types::ValueRef;
use std::collections::{BTreeMap, BTreeSet};

/// One physical team table layout. Per-event stores were seeded by
/// different tools over the years, so any subset of these tables (and of
/// their columns) may be present.
#[derive(Debug, Clone, Copy)]
pub struct TeamLayout {
    pub table: &'static str,
    pub number_column: &'static str,
    pub name_columns: &'static [&'static str],
    pub organization_columns: &'static [&'static str],
    pub city_columns: &'static [&'static str],
    pub country_columns: &'static [&'static str],
}

/// Layouts in preference order. Earlier layouts win per field.
pub const TEAM_LAYOUTS: [TeamLayout; 3] = [
    TeamLayout {
        table: "team_metadata",
        number_column: "team_number",
        name_columns: &["team_name"],
        organization_columns: &["organization_school", "school"],
        city_columns: &["city"],
        country_columns: &["country"],
    },
    TeamLayout {
        table: "legacy_teams",
        number_column: "number",
        name_columns: &["name_long", "name_short"],
        organization_columns: &["school"],
        city_columns: &["city"],
        country_columns: &["country"],
    },
    TeamLayout {
        table: "teams",
        number_column: "number",
        name_columns: &[],
        organization_columns: &[],
        city_columns: &[],
        country_columns: &[],
    },
];

#[derive(Debug, Default)]
struct PartialTeam {
    name: Option<String>,
    organization: Option<String>,
    city: Option<String>,
    country: Option<String>,
}

impl PartialTeam {
    fn finish(self, team_number: u32) -> TeamIdentity {
        TeamIdentity {
            team_number,
            team_name: self
                .name
                .unwrap_or_else(|| TeamIdentity::default_name(team_number)),
            organization_school: self.organization.unwrap_or_default(),
            city: self.city.unwrap_or_default(),
            country: self.country.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Name,
    Organization,
    City,
    Country,
}

impl TeamLayout {
    fn candidates(&self, field: Field) -> &'static [&'static str] {
        match field {
            Field::Name => self.name_columns,
            Field::Organization => self.organization_columns,
            Field::City => self.city_columns,
            Field::Country => self.country_columns,
        }
    }

    /// Projection of the columns this store actually has, in candidate
    /// order, each tagged with the field it feeds.
    fn projection(&self, present: &BTreeSet<String>) -> Vec<(Field, &'static str)> {
        let mut projection = Vec::new();
        for field in [Field::Name, Field::Organization, Field::City, Field::Country] {
            for column in self.candidates(field) {
                if present.contains(*column) {
                    projection.push((field, *column));
                }
            }
        }
        projection
    }
}

impl EventStore {
    /// Canonical team list of the event, ordered by team number.
    pub fn resolve_teams(&self) -> Result<Vec<TeamIdentity>, StorageError> {
        let mut merged: BTreeMap<u32, PartialTeam> = BTreeMap::new();
        for layout in &TEAM_LAYOUTS {
            self.merge_layout(layout, &mut merged)?;
        }

        Ok(merged
            .into_iter()
            .map(|(team_number, partial)| partial.finish(team_number))
            .collect())
    }

    pub fn resolve_team(&self, team_number: u32) -> Result<Option<TeamIdentity>, StorageError> {
        Ok(self
            .resolve_teams()?
            .into_iter()
            .find(|team| team.team_number == team_number))
    }

    fn merge_layout(
        &self,
        layout: &TeamLayout,
        merged: &mut BTreeMap<u32, PartialTeam>,
    ) -> Result<(), StorageError> {
        if !self.table_exists(layout.table)? {
            return Ok(());
        }
        let present = self.table_columns(layout.table)?;
        if !present.contains(layout.number_column) {
            return Ok(());
        }

        let projection = layout.projection(&present);
        let mut select = vec![quote_identifier(layout.number_column)];
        select.extend(projection.iter().map(|(_, column)| quote_identifier(column)));
        let sql = format!(
            "SELECT {} FROM {}",
            select.join(", "),
            quote_identifier(layout.table)
        );

        let mut statement = self.conn.prepare(&sql)?;
        let mut rows = statement.query([])?;
        while let Some(row) = rows.next()? {
            let Some(team_number) = team_number_value(row.get_ref(0)?) else {
                continue;
            };
            let entry = merged.entry(team_number).or_default();
            for (offset, (field, _)) in projection.iter().enumerate() {
                let Some(value) = text_value(row.get_ref(offset + 1)?) else {
                    continue;
                };
                let slot = match field {
                    Field::Name => &mut entry.name,
                    Field::Organization => &mut entry.organization,
                    Field::City => &mut entry.city,
                    Field::Country => &mut entry.country,
                };
                if slot.is_none() {
                    *slot = Some(value);
                }
            }
        }

        Ok(())
    }
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Team numbers are positive; anything else in a legacy table is skipped.
fn team_number_value(value: ValueRef<'_>) -> Option<u32> {
    let raw = match value {
        ValueRef::Integer(number) => number,
        ValueRef::Real(number) if number.fract() == 0.0 => number as i64,
        ValueRef::Text(text) => std::str::from_utf8(text).ok()?.trim().parse().ok()?,
        _ => return None,
    };
    u32::try_from(raw).ok().filter(|number| *number > 0)
}

fn text_value(value: ValueRef<'_>) -> Option<String> {
    let text = match value {
        ValueRef::Text(text) => String::from_utf8_lossy(text).trim().to_string(),
        ValueRef::Integer(number) => number.to_string(),
        ValueRef::Real(number) => number.to_string(),
        ValueRef::Null | ValueRef::Blob(_) => return None,
    };
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use pitstop_core::Event;

    fn open_store() -> EventStore {
        let start = Utc
            .with_ymd_and_hms(2026, 3, 14, 8, 0, 0)
            .single()
            .expect("valid timestamp");
        EventStore::open_in_memory(Event {
            code: "demo1".to_string(),
            name: "Demo".to_string(),
            region: String::new(),
            event_type: 0,
            status: 0,
            start,
            end: start,
            divisions: 0,
        })
        .expect("open store")
    }

    fn team(number: u32, name: &str, org: &str, city: &str, country: &str) -> TeamIdentity {
        TeamIdentity {
            team_number: number,
            team_name: name.to_string(),
            organization_school: org.to_string(),
            city: city.to_string(),
            country: country.to_string(),
        }
    }

    #[test]
    fn store_without_team_tables_has_no_teams() {
        let store = open_store();
        assert!(store.resolve_teams().expect("resolve").is_empty());
    }

    #[test]
    fn minimal_layout_synthesizes_names() {
        let store = open_store();
        store
            .conn
            .execute_batch(
                "
                CREATE TABLE teams (number INTEGER PRIMARY KEY);
                INSERT INTO teams (number) VALUES (42), (7), (-3), (0);
                ",
            )
            .expect("seed");

        assert_eq!(
            store.resolve_teams().expect("resolve"),
            vec![team(7, "Team 7", "", "", ""), team(42, "Team 42", "", "", "")]
        );
    }

    #[test]
    fn metadata_wins_over_legacy_and_legacy_fills_gaps() {
        let store = open_store();
        store
            .conn
            .execute_batch(
                "
                CREATE TABLE team_metadata (team_number INTEGER, team_name TEXT, city TEXT);
                INSERT INTO team_metadata VALUES (100, 'Metal Minds', NULL);
                INSERT INTO team_metadata VALUES (200, '   ', 'Austin');
                CREATE TABLE legacy_teams (
                    number INTEGER, name_short TEXT, name_long TEXT,
                    school TEXT, city TEXT, country TEXT
                );
                INSERT INTO legacy_teams VALUES (100, 'MM', 'Metal Minds Robotics', 'Central HS', 'Denver', 'USA');
                INSERT INTO legacy_teams VALUES (200, 'Bolts', NULL, NULL, 'Dallas', 'USA');
                INSERT INTO legacy_teams VALUES (300, NULL, NULL, NULL, NULL, NULL);
                ",
            )
            .expect("seed");

        assert_eq!(
            store.resolve_teams().expect("resolve"),
            vec![
                team(100, "Metal Minds", "Central HS", "Denver", "USA"),
                team(200, "Bolts", "", "Austin", "USA"),
                team(300, "Team 300", "", "", ""),
            ]
        );
    }

    #[test]
    fn metadata_table_missing_its_number_column_is_ignored() {
        let store = open_store();
        store
            .conn
            .execute_batch(
                "
                CREATE TABLE team_metadata (id INTEGER, team_name TEXT);
                INSERT INTO team_metadata VALUES (5, 'Ghost');
                CREATE TABLE teams (number INTEGER);
                INSERT INTO teams VALUES (5);
                ",
            )
            .expect("seed");

        assert_eq!(
            store.resolve_teams().expect("resolve"),
            vec![team(5, "Team 5", "", "", "")]
        );
    }

    #[test]
    fn metadata_school_column_is_used_when_organization_is_absent() {
        let store = open_store();
        store
            .conn
            .execute_batch(
                "
                CREATE TABLE team_metadata (team_number TEXT, school TEXT, country TEXT);
                INSERT INTO team_metadata VALUES (' 12 ', 'North Prep', 'Canada');
                ",
            )
            .expect("seed");

        assert_eq!(
            store.resolve_team(12).expect("resolve"),
            Some(team(12, "Team 12", "North Prep", "", "Canada"))
        );
        assert_eq!(store.resolve_team(13).expect("resolve"), None);
    }

    #[test]
    fn table_and_column_names_match_regardless_of_case() {
        let store = open_store();
        store
            .conn
            .execute_batch(
                "
                CREATE TABLE Team_Metadata (Team_Number INTEGER, TEAM_NAME TEXT, City TEXT);
                INSERT INTO Team_Metadata VALUES (8, 'Gear Heads', 'Omaha');
                CREATE TABLE Teams (Number INTEGER);
                INSERT INTO Teams VALUES (8), (42);
                ",
            )
            .expect("seed");

        assert!(store.table_exists("teams").expect("probe"));
        assert!(store.table_columns("Teams").expect("columns").contains("number"));
        assert_eq!(
            store.resolve_teams().expect("resolve"),
            vec![
                team(8, "Gear Heads", "", "Omaha", ""),
                team(42, "Team 42", "", "", ""),
            ]
        );
    }

    #[test]
    fn union_covers_numbers_from_every_layout() {
        let store = open_store();
        store
            .conn
            .execute_batch(
                "
                CREATE TABLE team_metadata (team_number INTEGER, team_name TEXT);
                INSERT INTO team_metadata VALUES (3, 'Three');
                CREATE TABLE legacy_teams (number INTEGER, name_short TEXT);
                INSERT INTO legacy_teams VALUES (2, 'Two');
                CREATE TABLE teams (number INTEGER);
                INSERT INTO teams VALUES (1), (2), (3);
                ",
            )
            .expect("seed");

        let names: Vec<(u32, String)> = store
            .resolve_teams()
            .expect("resolve")
            .into_iter()
            .map(|team| (team.team_number, team.team_name))
            .collect();
        assert_eq!(
            names,
            vec![
                (1, "Team 1".to_string()),
                (2, "Two".to_string()),
                (3, "Three".to_string()),
            ]
        );
    }
}
