//! Staging: the step between raw frames and preprocessing

use crate::containers::{DataFrame, FloatColumn, IntColumn};
use crate::data_model::{macros, Placeholder};
use crate::error::Result;
use crate::fastprop::{JoinedTable, TableHolder};

/// Stages the input frames for one placeholder level.
///
/// Staging injects the synthetic join key where the data model declares a
/// join without one, flattens one-to-one and many-to-one joins into the
/// population table, validates that every declared join key and time stamp
/// exists, rebuilds the indices and freezes the output. It never mutates
/// its inputs, and staging an already-staged frame reproduces it unchanged.
pub fn stage(
    placeholder: &Placeholder,
    population: &DataFrame,
    peripheral: &[DataFrame],
    peripheral_names: &[String],
) -> Result<(DataFrame, Vec<DataFrame>)> {
    let mut staged_population = population.clone_as(population.name());
    let mut staged_peripheral: Vec<DataFrame> = peripheral
        .iter()
        .map(|df| df.clone_as(df.name()))
        .collect();

    add_synthetic_join_keys(placeholder, &mut staged_population, &mut staged_peripheral)?;

    for df in staged_peripheral.iter_mut() {
        df.create_indices();
    }

    // Validation happens as a side effect of resolving the joins.
    let holder = TableHolder::new(
        placeholder,
        &staged_population,
        &staged_peripheral,
        peripheral_names,
    )?;

    flatten_joins(placeholder, &holder, &mut staged_population)?;

    staged_population.create_indices();
    staged_population.freeze();
    for df in staged_peripheral.iter_mut() {
        df.freeze();
    }

    Ok((staged_population, staged_peripheral))
}

/// Adds the constant synthetic key to both sides of every join that
/// declares none. Skipped when the column already exists, which makes
/// staging idempotent.
fn add_synthetic_join_keys(
    placeholder: &Placeholder,
    population: &mut DataFrame,
    peripheral: &mut [DataFrame],
) -> Result<()> {
    for ix in 0..placeholder.num_joined() {
        let spec = placeholder.join_spec(ix);
        if spec.join_key != macros::SYNTHETIC_JOIN_KEY {
            continue;
        }

        if !population.has_join_key(macros::SYNTHETIC_JOIN_KEY) {
            population.add_join_key(IntColumn::constant(
                macros::SYNTHETIC_JOIN_KEY,
                0,
                population.nrows(),
            ))?;
        }
        for df in peripheral.iter_mut() {
            if !df.has_join_key(macros::SYNTHETIC_JOIN_KEY) {
                df.add_join_key(IntColumn::constant(
                    macros::SYNTHETIC_JOIN_KEY,
                    0,
                    df.nrows(),
                ))?;
            }
        }
    }

    Ok(())
}

/// Copies the matched peripheral row's value columns into the population
/// for joins declared one-to-one or many-to-one. The copied columns carry
/// the `$joined$table.column` marker and the first match wins.
fn flatten_joins(
    placeholder: &Placeholder,
    holder: &TableHolder,
    population: &mut DataFrame,
) -> Result<()> {
    for ix in 0..placeholder.num_joined() {
        if !placeholder.relationship(ix).is_flattened() {
            continue;
        }
        let join = holder.join(ix);
        let first_matches = first_match_per_row(join, population.nrows());

        flatten_numericals(join, &first_matches, population)?;
        flatten_categoricals(join, &first_matches, population)?;
    }
    Ok(())
}

fn first_match_per_row(join: &JoinedTable, nrows: usize) -> Vec<Option<usize>> {
    let mut matches = Vec::new();
    (0..nrows)
        .map(|rownum| {
            matches.clear();
            crate::fastprop::make_matches(join, rownum, &mut matches);
            matches.first().map(|m| m.ix_peripheral)
        })
        .collect()
}

fn flatten_numericals(
    join: &JoinedTable,
    first_matches: &[Option<usize>],
    population: &mut DataFrame,
) -> Result<()> {
    for col_ix in 0..join.peripheral.num_numericals() {
        let col = join.peripheral.numerical(col_ix);
        let name = format!(
            "{}{}.{}",
            macros::JOINED,
            join.peripheral.name(),
            col.name()
        );
        if population.to_schema().numericals.contains(&name) {
            continue;
        }
        let values: Vec<f64> = first_matches
            .iter()
            .map(|m| m.map(|ix| col.get(ix)).unwrap_or(f64::NAN))
            .collect();
        let mut joined = FloatColumn::new(&name, values);
        joined.set_unit(col.unit());
        population.add_numerical(joined)?;
    }
    Ok(())
}

fn flatten_categoricals(
    join: &JoinedTable,
    first_matches: &[Option<usize>],
    population: &mut DataFrame,
) -> Result<()> {
    for col_ix in 0..join.peripheral.num_categoricals() {
        let col = join.peripheral.categorical(col_ix);
        let name = format!(
            "{}{}.{}",
            macros::JOINED,
            join.peripheral.name(),
            col.name()
        );
        if population.to_schema().categoricals.contains(&name) {
            continue;
        }
        let values: Vec<i64> = first_matches
            .iter()
            .map(|m| {
                m.map(|ix| col.get(ix))
                    .unwrap_or(crate::containers::NULL_INT)
            })
            .collect();
        let mut joined = IntColumn::new(&name, values);
        joined.set_unit(col.unit());
        population.add_categorical(joined)?;
    }
    Ok(())
}
