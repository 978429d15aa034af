//! FILENAME: core/crosstab-layout/tests/common/mod.rs
//! Fixtures shared by the layout and pagination integration tests.

#![allow(dead_code)]

use crosstab_engine::{
    Aggregation, CellType, CrosstabBuilder, CrosstabDefinition, Extent, Grid, GridCell,
    GroupDefinition, MeasureDefinition, Record,
};
use crosstab_layout::{resolve, MeasureError, ResolvedGrid, StaticMeasurer};

pub fn sale(region: &str, city: &str, quarter: &str, sales: i64) -> Record {
    Record::new()
        .with("region", region)
        .with("city", city)
        .with("quarter", quarter)
        .with("sales", sales)
}

/// Region > City by Quarter, sum of sales.
pub struct SalesFixture {
    pub definition: CrosstabDefinition,
    pub records: Vec<Record>,
}

impl SalesFixture {
    /// Totals on every group.
    pub fn new() -> Self {
        SalesFixture {
            definition: Self::definition(true),
            records: Self::records(),
        }
    }

    /// No totals anywhere, so East spans exactly its three cities.
    pub fn without_totals() -> Self {
        SalesFixture {
            definition: Self::definition(false),
            records: Self::records(),
        }
    }

    fn definition(totals: bool) -> CrosstabDefinition {
        let mut def = CrosstabDefinition::new("sales");
        def.row_groups.push(GroupDefinition::new("Region", "region").with_totals(totals));
        def.row_groups.push(GroupDefinition::new("City", "city").with_totals(totals));
        def.column_groups.push(GroupDefinition::new("Quarter", "quarter").with_totals(totals));
        def.measures.push(MeasureDefinition::new("Sales", "sales", Aggregation::Sum));
        def
    }

    fn records() -> Vec<Record> {
        vec![
            sale("East", "Boston", "Q1", 120),
            sale("East", "Boston", "Q2", 80),
            sale("East", "New York", "Q1", 300),
            sale("East", "New York", "Q3", 45),
            sale("East", "Newark", "Q2", 17),
            sale("West", "Denver", "Q1", 64),
            sale("West", "Denver", "Q4", 9),
            sale("West", "Seattle", "Q3", 210),
        ]
    }

    pub fn grid(&self) -> Grid {
        CrosstabBuilder::new(self.definition.clone())
            .unwrap()
            .fill(&self.records)
            .unwrap()
    }

    pub fn resolved(&self) -> ResolvedGrid {
        resolve(self.grid(), &StaticMeasurer::default()).unwrap()
    }
}

/// Every cell measures the same.
pub fn uniform(width: u32, height: u32) -> impl Fn(&GridCell) -> Result<Extent, MeasureError> + Sync {
    move |_: &GridCell| Ok(Extent::new(width, height))
}

/// Generated crosstab: `regions` regions of `cities` cities each, every
/// city selling in `quarters` quarters, with a few gaps picked by `seed`.
pub fn generated_grid(regions: usize, cities: usize, quarters: usize, seed: u64) -> Grid {
    let mut records = Vec::new();
    for r in 0..regions {
        for c in 0..cities {
            for q in 0..quarters {
                let key = (r * 31 + c * 7 + q) as u64;
                if (seed >> (key % 64)) & 1 == 1 && q > 0 {
                    continue;
                }
                records.push(sale(
                    &format!("Region {:02}", r),
                    &format!("City {:02}", c),
                    &format!("Q{}", q + 1),
                    (key * 13 % 997) as i64,
                ));
            }
        }
    }
    SalesFixture {
        definition: SalesFixture::definition(true),
        records,
    }
    .grid()
}

/// Deterministic, position-dependent sizes, with headers a little larger.
pub fn varied(cell: &GridCell) -> Result<Extent, MeasureError> {
    let base = (cell.row * 7 + cell.column * 13) as u32;
    let (width, height) = match cell.cell_type {
        CellType::RowHeader | CellType::ColumnHeader => (40 + base % 30, 12 + base % 25),
        _ => (20 + base % 20, 10 + base % 9),
    };
    Ok(Extent::new(width, height))
}
