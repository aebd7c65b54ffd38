use crate::entity::CodeEntity;
use crate::query::{ClonePair, EntityCount};
use tabled::{settings::Style, Table, Tabled};

#[derive(Tabled)]
pub struct TableRow {
    #[tabled(rename = "Metric")]
    pub metric: String,
    #[tabled(rename = "Value")]
    pub value: String,
}

#[derive(Default)]
pub struct TableBuilder {
    rows: Vec<TableRow>,
}

impl TableBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_row(&mut self, label: &str, value: &str) {
        self.rows.push(TableRow {
            metric: label.to_string(),
            value: value.to_string(),
        });
    }

    pub fn build(&self) -> String {
        if self.rows.is_empty() {
            return String::new();
        }
        Table::new(&self.rows).with(Style::rounded()).to_string()
    }
}

pub fn stats_table(stats: &[(&str, String)]) -> String {
    let mut builder = TableBuilder::new();
    for (label, value) in stats {
        builder.add_row(label, value);
    }
    builder.build()
}

#[derive(Tabled)]
struct EntityRow {
    #[tabled(rename = "Type")]
    entity_type: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Location")]
    location: String,
    #[tabled(rename = "Id")]
    id: String,
}

fn location(file_path: Option<&str>, line: Option<u32>) -> String {
    match (file_path, line) {
        (Some(path), Some(line)) => format!("{}:{}", path, line),
        (Some(path), None) => path.to_string(),
        (None, _) => "-".to_string(),
    }
}

pub fn entity_table(entities: &[&CodeEntity]) -> String {
    let rows: Vec<EntityRow> = entities
        .iter()
        .map(|e| EntityRow {
            entity_type: e.entity_type().to_string(),
            name: e.full_name.clone().unwrap_or_else(|| e.name.clone()),
            location: location(e.file_path.as_deref(), e.start_line),
            id: e.id.to_string(),
        })
        .collect();
    Table::new(rows).with(Style::rounded()).to_string()
}

#[derive(Tabled)]
struct RankRow {
    #[tabled(rename = "#")]
    rank: usize,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "File")]
    file: String,
    #[tabled(rename = "Count")]
    count: usize,
}

pub fn ranking_table(ranked: &[EntityCount]) -> String {
    let rows: Vec<RankRow> = ranked
        .iter()
        .enumerate()
        .map(|(i, r)| RankRow {
            rank: i + 1,
            name: r.name.clone(),
            file: location(r.file_path.as_deref(), None),
            count: r.count,
        })
        .collect();
    Table::new(rows).with(Style::rounded()).to_string()
}

#[derive(Tabled)]
struct CloneRow {
    #[tabled(rename = "Left")]
    left: String,
    #[tabled(rename = "Right")]
    right: String,
    #[tabled(rename = "Similarity")]
    weight: String,
}

pub fn clone_table(pairs: &[ClonePair<'_>]) -> String {
    let rows: Vec<CloneRow> = pairs
        .iter()
        .map(|pair| CloneRow {
            left: format!("{} ({})", pair.left.name, location(pair.left.file_path.as_deref(), pair.left.start_line)),
            right: format!("{} ({})", pair.right.name, location(pair.right.file_path.as_deref(), pair.right.start_line)),
            weight: format!("{:.3}", pair.weight),
        })
        .collect();
    Table::new(rows).with(Style::rounded()).to_string()
}
