//! Candidate enumeration, selection and the parallel transform

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use ndarray::Array2;
use rand::Rng;
use rand_chacha::rand_core::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::containers::{DataFrame, IntColumn, Match, Schema};
use crate::data_model::{macros, Placeholder};
use crate::error::{RelpropError, Result};
use crate::fastprop::abstract_feature::{AbstractFeature, DataUsed};
use crate::fastprop::aggregation::Aggregation;
use crate::fastprop::aggregator;
use crate::fastprop::condition::{make_condition_fn, Condition};
use crate::fastprop::hyperparameters::Hyperparameters;
use crate::fastprop::importance::{ColumnDescription, ImportanceMaker, Marker};
use crate::fastprop::matchmaker;
use crate::fastprop::memoization::Memoization;
use crate::fastprop::r_squared;
use crate::fastprop::table_holder::{JoinedTable, TableHolder};
use crate::textmining::{Vocabulary, WordIndex};

/// Rows per progress increment; also the flush cadence of the row cache.
const LOG_INTERVAL: usize = 5000;

/// Candidate features scored per selection batch, capping peak memory.
const SELECTION_BATCH_SIZE: usize = 100;

/// Frames handed to [`FastProp::fit`].
pub struct FitParams<'a> {
    pub population: &'a DataFrame,
    pub peripheral: &'a [DataFrame],
}

/// Frames handed to [`FastProp::transform`].
pub struct TransformParams<'a> {
    pub population: &'a DataFrame,
    pub peripheral: &'a [DataFrame],
}

/// The FastProp feature learner.
///
/// Fitting enumerates abstract features over the join graph (recursing into
/// subfeatures for nested joins) and keeps the `num_features` candidates
/// with the highest univariate R². Transforming evaluates the kept features
/// row-parallel into a dense matrix.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FastProp {
    hyperparameters: Arc<Hyperparameters>,
    peripheral: Arc<Vec<String>>,
    placeholder: Arc<Placeholder>,
    features: Option<Arc<Vec<AbstractFeature>>>,
    subfeatures: Vec<Option<Box<FastProp>>>,
    vocabularies: Vec<Vec<Vocabulary>>,
    population_schema: Option<Schema>,
    peripheral_schemas: Vec<Schema>,
}

impl FastProp {
    pub fn new(
        hyperparameters: Arc<Hyperparameters>,
        peripheral: Arc<Vec<String>>,
        placeholder: Arc<Placeholder>,
    ) -> Result<Self> {
        hyperparameters.check()?;
        placeholder.check(&peripheral)?;
        Ok(Self {
            hyperparameters,
            peripheral,
            placeholder,
            features: None,
            subfeatures: Vec::new(),
            vocabularies: Vec::new(),
            population_schema: None,
            peripheral_schemas: Vec::new(),
        })
    }

    pub fn hyperparameters(&self) -> &Hyperparameters {
        &self.hyperparameters
    }

    pub fn placeholder(&self) -> &Placeholder {
        &self.placeholder
    }

    pub fn peripheral_names(&self) -> &[String] {
        &self.peripheral
    }

    pub fn population_schema(&self) -> Option<&Schema> {
        self.population_schema.as_ref()
    }

    pub fn features(&self) -> &[AbstractFeature] {
        self.features.as_ref().map(|f| f.as_slice()).unwrap_or(&[])
    }

    pub fn num_features(&self) -> usize {
        self.features().len()
    }

    pub fn subfeatures(&self) -> &[Option<Box<FastProp>>] {
        &self.subfeatures
    }

    pub fn vocabulary(&self, join_ix: usize, text_col: usize) -> &Vocabulary {
        &self.vocabularies[join_ix][text_col]
    }

    pub fn peripheral_schema(&self, join_ix: usize) -> &Schema {
        &self.peripheral_schemas[join_ix]
    }

    // ------------------------------------------------------------------
    // Fitting

    /// Fits the feature learner. Subfeature learners keep all their
    /// candidates; only the top level runs R² selection.
    pub fn fit(&mut self, params: &FitParams<'_>, as_subfeatures: bool) -> Result<()> {
        self.population_schema = Some(params.population.to_schema());

        let table_holder = TableHolder::new(
            &self.placeholder,
            params.population,
            params.peripheral,
            &self.peripheral,
        )?;

        self.peripheral_schemas = table_holder
            .joins()
            .iter()
            .map(|j| j.peripheral.to_schema())
            .collect();

        self.fit_vocabularies(&table_holder);

        self.fit_subfeatures(params)?;

        let conditions = self.make_conditions(&table_holder);

        let mut candidates = Vec::new();
        for (ix, join) in table_holder.joins().iter().enumerate() {
            self.fit_on_peripheral(join, ix, &conditions, &mut candidates);
        }

        if !self.hyperparameters.silent {
            info!("FastProp: Trying {} features...", candidates.len());
        }

        self.features = Some(Arc::new(candidates));

        if !as_subfeatures {
            let rownums = self.sample_from_population(params.population.nrows());
            self.features = Some(Arc::new(self.select_features(params, &rownums)?));
        }

        Ok(())
    }

    fn fit_vocabularies(&mut self, table_holder: &TableHolder) {
        self.vocabularies = table_holder
            .joins()
            .iter()
            .map(|join| {
                (0..join.peripheral.num_text())
                    .map(|ix| {
                        Vocabulary::fit(
                            join.peripheral.text(ix),
                            self.hyperparameters.min_df,
                            self.hyperparameters.vocab_size,
                        )
                    })
                    .collect()
            })
            .collect();
    }

    /// One nested learner per joined table that itself has joined tables,
    /// except those flagged for separate propositionalization.
    fn fit_subfeatures(&mut self, params: &FitParams<'_>) -> Result<()> {
        let mut subfeatures = Vec::with_capacity(self.placeholder.num_joined());

        for (ix, child) in self.placeholder.joined_tables().iter().enumerate() {
            if child.num_joined() == 0 || self.placeholder.is_propositionalization(ix) {
                subfeatures.push(None);
                continue;
            }

            let new_population = self.find_peripheral(params.peripheral, child.name())?;

            let mut sub = FastProp::new(
                self.hyperparameters.clone(),
                self.peripheral.clone(),
                Arc::new(child.clone()),
            )?;
            sub.fit(
                &FitParams {
                    population: new_population,
                    peripheral: params.peripheral,
                },
                true,
            )?;
            subfeatures.push(Some(Box::new(sub)));
        }

        self.subfeatures = subfeatures;
        Ok(())
    }

    fn find_peripheral<'a>(
        &self,
        peripheral: &'a [DataFrame],
        name: &str,
    ) -> Result<&'a DataFrame> {
        if peripheral.len() < self.peripheral.len() {
            return Err(RelpropError::UserInput(
                "The number of peripheral tables does not match the number of peripheral placeholders."
                    .to_string(),
            ));
        }
        let ix = self.find_peripheral_ix(name)?;
        Ok(&peripheral[ix])
    }

    fn find_peripheral_ix(&self, name: &str) -> Result<usize> {
        self.peripheral
            .iter()
            .position(|n| n == name)
            .ok_or_else(|| {
                RelpropError::UserInput(format!("Placeholder named '{}' not found.", name))
            })
    }

    // ------------------------------------------------------------------
    // Condition generation

    fn make_conditions(&self, table_holder: &TableHolder) -> Vec<Vec<Condition>> {
        let mut conditions = vec![Vec::new()];

        for (ix, join) in table_holder.joins().iter().enumerate() {
            self.make_categorical_conditions(join, ix, &mut conditions);
            self.make_lag_conditions(join, ix, &mut conditions);
            self.make_same_units_categorical_conditions(join, ix, &mut conditions);
        }

        conditions
    }

    fn make_categorical_conditions(
        &self,
        join: &JoinedTable,
        peripheral_ix: usize,
        conditions: &mut Vec<Vec<Condition>>,
    ) {
        if self.hyperparameters.n_most_frequent == 0 {
            return;
        }

        for input_col in 0..join.peripheral.num_categoricals() {
            if is_comparison_only(join.peripheral.categorical(input_col).unit()) {
                continue;
            }
            for category_used in self.find_most_frequent_categories(join.peripheral.categorical(input_col)) {
                conditions.push(vec![Condition::Categorical {
                    category_used,
                    input_col,
                    peripheral: peripheral_ix,
                }]);
            }
        }
    }

    fn make_lag_conditions(
        &self,
        join: &JoinedTable,
        peripheral_ix: usize,
        conditions: &mut Vec<Vec<Condition>>,
    ) {
        if !join.is_time_windowed() {
            return;
        }
        if self.hyperparameters.delta_t <= 0.0 || self.hyperparameters.max_lag == 0 {
            return;
        }

        for k in 0..self.hyperparameters.max_lag {
            conditions.push(vec![Condition::Lag {
                bound_lower: self.hyperparameters.delta_t * k as f64,
                bound_upper: self.hyperparameters.delta_t * (k + 1) as f64,
                peripheral: peripheral_ix,
            }]);
        }
    }

    fn make_same_units_categorical_conditions(
        &self,
        join: &JoinedTable,
        peripheral_ix: usize,
        conditions: &mut Vec<Vec<Condition>>,
    ) {
        for output_col in 0..join.population.num_categoricals() {
            let unit = join.population.categorical(output_col).unit();
            if unit.is_empty() {
                continue;
            }
            for input_col in 0..join.peripheral.num_categoricals() {
                if unit == join.peripheral.categorical(input_col).unit() {
                    conditions.push(vec![Condition::SameUnitsCategorical {
                        input_col,
                        output_col,
                        peripheral: peripheral_ix,
                    }]);
                }
            }
        }
    }

    fn find_most_frequent_categories(&self, col: &IntColumn) -> Vec<i64> {
        let mut frequencies: std::collections::HashMap<i64, usize> =
            std::collections::HashMap::new();
        for &val in col.iter() {
            if val >= 0 {
                *frequencies.entry(val).or_insert(0) += 1;
            }
        }

        let mut pairs: Vec<(i64, usize)> = frequencies.into_iter().collect();
        pairs.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        pairs
            .into_iter()
            .take(self.hyperparameters.n_most_frequent)
            .map(|(id, _)| id)
            .collect()
    }

    // ------------------------------------------------------------------
    // Candidate enumeration

    fn fit_on_peripheral(
        &self,
        join: &JoinedTable,
        peripheral_ix: usize,
        conditions: &[Vec<Condition>],
        out: &mut Vec<AbstractFeature>,
    ) {
        let relevant = conditions
            .iter()
            .filter(|set| set.iter().all(|c| c.peripheral() == peripheral_ix));

        for condition_set in relevant {
            self.fit_on_categoricals(join, peripheral_ix, condition_set, out);
            self.fit_on_categoricals_by_categories(join, peripheral_ix, condition_set, out);
            self.fit_on_discretes(join, peripheral_ix, condition_set, out);
            self.fit_on_numericals(join, peripheral_ix, condition_set, out);
            self.fit_on_same_units_categorical(join, peripheral_ix, condition_set, out);
            self.fit_on_same_units_discrete(join, peripheral_ix, condition_set, out);
            self.fit_on_same_units_numerical(join, peripheral_ix, condition_set, out);
            self.fit_on_subfeatures(join, peripheral_ix, condition_set, out);
            self.fit_on_text(join, peripheral_ix, condition_set, out);

            if join.is_time_windowed() {
                out.push(AbstractFeature::new(
                    Aggregation::AvgTimeBetween,
                    condition_set.clone(),
                    DataUsed::Na,
                    0,
                    peripheral_ix,
                ));
            }
        }

        if self.hyperparameters.has_count() {
            out.push(AbstractFeature::new(
                Aggregation::Count,
                Vec::new(),
                DataUsed::Na,
                0,
                peripheral_ix,
            ));
        }
    }

    /// Pair-based aggregations need time stamps on both sides of the join.
    fn skip_pair_based(&self, agg: Aggregation, join: &JoinedTable) -> bool {
        agg.is_pair_based() && !join.is_time_windowed()
    }

    fn fit_on_categoricals(
        &self,
        join: &JoinedTable,
        peripheral_ix: usize,
        conditions: &[Condition],
        out: &mut Vec<AbstractFeature>,
    ) {
        if conditions.iter().any(|c| c.is_categorical()) {
            return;
        }
        for input_col in 0..join.peripheral.num_categoricals() {
            if is_comparison_only(join.peripheral.categorical(input_col).unit()) {
                continue;
            }
            for &agg in &self.hyperparameters.aggregation {
                if !agg.is_categorical() {
                    continue;
                }
                out.push(AbstractFeature::new(
                    agg,
                    conditions.to_vec(),
                    DataUsed::Categorical,
                    input_col,
                    peripheral_ix,
                ));
            }
        }
    }

    fn fit_on_categoricals_by_categories(
        &self,
        join: &JoinedTable,
        peripheral_ix: usize,
        conditions: &[Condition],
        out: &mut Vec<AbstractFeature>,
    ) {
        if conditions.iter().any(|c| c.is_categorical()) {
            return;
        }
        for input_col in 0..join.peripheral.num_categoricals() {
            if is_comparison_only(join.peripheral.categorical(input_col).unit()) {
                continue;
            }
            let most_frequent =
                self.find_most_frequent_categories(join.peripheral.categorical(input_col));
            for categorical_value in most_frequent {
                for &agg in &self.hyperparameters.aggregation {
                    if !agg.is_numerical() || self.skip_pair_based(agg, join) {
                        continue;
                    }
                    out.push(
                        AbstractFeature::new(
                            agg,
                            conditions.to_vec(),
                            DataUsed::Categorical,
                            input_col,
                            peripheral_ix,
                        )
                        .with_categorical_value(categorical_value),
                    );
                }
            }
        }
    }

    fn fit_on_discretes(
        &self,
        join: &JoinedTable,
        peripheral_ix: usize,
        conditions: &[Condition],
        out: &mut Vec<AbstractFeature>,
    ) {
        for input_col in 0..join.peripheral.num_discretes() {
            if is_comparison_only(join.peripheral.discrete(input_col).unit()) {
                continue;
            }
            for &agg in &self.hyperparameters.aggregation {
                if !agg.is_numerical() || self.skip_pair_based(agg, join) {
                    continue;
                }
                out.push(AbstractFeature::new(
                    agg,
                    conditions.to_vec(),
                    DataUsed::Discrete,
                    input_col,
                    peripheral_ix,
                ));
            }
        }
    }

    fn fit_on_numericals(
        &self,
        join: &JoinedTable,
        peripheral_ix: usize,
        conditions: &[Condition],
        out: &mut Vec<AbstractFeature>,
    ) {
        for input_col in 0..join.peripheral.num_numericals() {
            if is_comparison_only(join.peripheral.numerical(input_col).unit()) {
                continue;
            }
            for &agg in &self.hyperparameters.aggregation {
                if !agg.is_numerical() || self.skip_pair_based(agg, join) {
                    continue;
                }
                out.push(AbstractFeature::new(
                    agg,
                    conditions.to_vec(),
                    DataUsed::Numerical,
                    input_col,
                    peripheral_ix,
                ));
            }
        }
    }

    fn fit_on_same_units_categorical(
        &self,
        join: &JoinedTable,
        peripheral_ix: usize,
        conditions: &[Condition],
        out: &mut Vec<AbstractFeature>,
    ) {
        for output_col in 0..join.population.num_categoricals() {
            let unit = join.population.categorical(output_col).unit();
            if unit.is_empty() {
                continue;
            }
            for input_col in 0..join.peripheral.num_categoricals() {
                if unit != join.peripheral.categorical(input_col).unit() {
                    continue;
                }
                for &agg in &self.hyperparameters.aggregation {
                    if !agg.is_numerical() || self.skip_pair_based(agg, join) {
                        continue;
                    }
                    out.push(
                        AbstractFeature::new(
                            agg,
                            conditions.to_vec(),
                            DataUsed::SameUnitsCategorical,
                            input_col,
                            peripheral_ix,
                        )
                        .with_output_col(output_col),
                    );
                }
            }
        }
    }

    fn fit_on_same_units_discrete(
        &self,
        join: &JoinedTable,
        peripheral_ix: usize,
        conditions: &[Condition],
        out: &mut Vec<AbstractFeature>,
    ) {
        for output_col in 0..join.population.num_discretes() {
            let col = join.population.discrete(output_col);
            let unit = col.unit();
            if unit.is_empty() {
                continue;
            }
            for input_col in 0..join.peripheral.num_discretes() {
                if unit != join.peripheral.discrete(input_col).unit() {
                    continue;
                }
                let data_used = if is_ts(col.name(), unit) {
                    DataUsed::SameUnitsDiscreteTs
                } else {
                    DataUsed::SameUnitsDiscrete
                };
                for &agg in &self.hyperparameters.aggregation {
                    if !agg.is_numerical() || self.skip_pair_based(agg, join) {
                        continue;
                    }
                    out.push(
                        AbstractFeature::new(
                            agg,
                            conditions.to_vec(),
                            data_used,
                            input_col,
                            peripheral_ix,
                        )
                        .with_output_col(output_col),
                    );
                }
            }
        }
    }

    fn fit_on_same_units_numerical(
        &self,
        join: &JoinedTable,
        peripheral_ix: usize,
        conditions: &[Condition],
        out: &mut Vec<AbstractFeature>,
    ) {
        for output_col in 0..join.population.num_numericals() {
            let col = join.population.numerical(output_col);
            let unit = col.unit();
            if unit.is_empty() {
                continue;
            }
            for input_col in 0..join.peripheral.num_numericals() {
                if unit != join.peripheral.numerical(input_col).unit() {
                    continue;
                }
                let data_used = if is_ts(col.name(), unit) {
                    DataUsed::SameUnitsNumericalTs
                } else {
                    DataUsed::SameUnitsNumerical
                };
                for &agg in &self.hyperparameters.aggregation {
                    if !agg.is_numerical() || self.skip_pair_based(agg, join) {
                        continue;
                    }
                    out.push(
                        AbstractFeature::new(
                            agg,
                            conditions.to_vec(),
                            data_used,
                            input_col,
                            peripheral_ix,
                        )
                        .with_output_col(output_col),
                    );
                }
            }
        }
    }

    fn fit_on_subfeatures(
        &self,
        join: &JoinedTable,
        peripheral_ix: usize,
        conditions: &[Condition],
        out: &mut Vec<AbstractFeature>,
    ) {
        let Some(Some(sub)) = self.subfeatures.get(peripheral_ix) else {
            return;
        };
        for input_col in 0..sub.num_features() {
            for &agg in &self.hyperparameters.aggregation {
                if !agg.is_numerical() || self.skip_pair_based(agg, join) {
                    continue;
                }
                out.push(AbstractFeature::new(
                    agg,
                    conditions.to_vec(),
                    DataUsed::Subfeatures,
                    input_col,
                    peripheral_ix,
                ));
            }
        }
    }

    fn fit_on_text(
        &self,
        join: &JoinedTable,
        peripheral_ix: usize,
        conditions: &[Condition],
        out: &mut Vec<AbstractFeature>,
    ) {
        for input_col in 0..join.peripheral.num_text() {
            let vocabulary = &self.vocabularies[peripheral_ix][input_col];
            for word_id in 0..vocabulary.len() as i64 {
                for &agg in &self.hyperparameters.aggregation {
                    if !agg.is_numerical() || self.skip_pair_based(agg, join) {
                        continue;
                    }
                    out.push(
                        AbstractFeature::new(
                            agg,
                            conditions.to_vec(),
                            DataUsed::Text,
                            input_col,
                            peripheral_ix,
                        )
                        .with_categorical_value(word_id),
                    );
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Selection

    fn sample_from_population(&self, nrows: usize) -> Vec<usize> {
        if self.hyperparameters.sampling_factor >= 1.0 {
            return (0..nrows).collect();
        }
        let mut rng = ChaCha8Rng::seed_from_u64(5893);
        (0..nrows)
            .filter(|_| rng.gen::<f64>() < self.hyperparameters.sampling_factor)
            .collect()
    }

    /// Keeps the `num_features` candidates with the highest R², scored
    /// batch by batch; ties break in enumeration order.
    fn select_features(
        &self,
        params: &FitParams<'_>,
        rownums: &[usize],
    ) -> Result<Vec<AbstractFeature>> {
        let features = self.features();
        let num_features = self.hyperparameters.num_features;

        if features.len() <= num_features {
            if !self.hyperparameters.silent {
                info!("Trained features. Progress: 100%.");
            }
            return Ok(features.to_vec());
        }

        let transform_params = TransformParams {
            population: params.population,
            peripheral: params.peripheral,
        };

        let mut scores = Vec::with_capacity(features.len());

        let mut begin = 0;
        while begin < features.len() {
            let end = (begin + SELECTION_BATCH_SIZE).min(features.len());
            let index: Vec<usize> = (begin..end).collect();

            let matrix = self.transform_index(&transform_params, &index, Some(rownums))?;
            let r = r_squared::calculate(params.population.targets(), &matrix, rownums);
            scores.extend(r);

            if !self.hyperparameters.silent {
                info!(
                    "Built {} features. Progress: {}%.",
                    end,
                    (end * 100) / features.len()
                );
            }
            begin = end;
        }

        let mut order: Vec<usize> = (0..features.len()).collect();
        order.sort_by(|&a, &b| {
            scores[b]
                .partial_cmp(&scores[a])
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.cmp(&b))
        });

        let mut selected: Vec<usize> = order.into_iter().take(num_features).collect();
        selected.sort_unstable();

        Ok(selected.into_iter().map(|ix| features[ix].clone()).collect())
    }

    // ------------------------------------------------------------------
    // Transform

    /// Evaluates all fitted features over the population. The matrix has one
    /// row per population row and one column per feature, positioned by
    /// feature index.
    pub fn transform(&self, params: &TransformParams<'_>) -> Result<Array2<f64>> {
        let index: Vec<usize> = (0..self.num_features()).collect();
        self.transform_index(params, &index, None)
    }

    /// Evaluates the features at `index`. When `rownums` is given, only
    /// those population rows are computed; all other rows stay zero.
    pub fn transform_index(
        &self,
        params: &TransformParams<'_>,
        index: &[usize],
        rownums: Option<&[usize]>,
    ) -> Result<Array2<f64>> {
        if params.population.nrows() == 0 {
            return Err(RelpropError::UserInput(
                "Population table needs to contain at least some data!".to_string(),
            ));
        }
        if self.features.is_none() {
            return Err(RelpropError::NotFitted("FastProp".to_string()));
        }

        let table_holder = TableHolder::new(
            &self.placeholder,
            params.population,
            params.peripheral,
            &self.peripheral,
        )?;

        let subfeature_matrices = self.build_subfeatures(params, index)?;
        let word_indices = self.make_word_indices(&table_holder);

        let nrows = params.population.nrows();
        let all_rows: Vec<usize>;
        let rownums: &[usize] = match rownums {
            Some(r) => r,
            None => {
                all_rows = (0..nrows).collect();
                &all_rows
            }
        };

        let ncols = index.len();
        let mut matrix = Array2::<f64>::zeros((nrows, ncols));

        if ncols == 0 || rownums.is_empty() {
            return Ok(matrix);
        }

        let num_threads = self.hyperparameters.effective_num_threads();
        let partitions = partition_rows(rownums, num_threads);

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .build()
            .map_err(|e| RelpropError::External(e.to_string()))?;

        let num_completed = AtomicUsize::new(0);
        let total = rownums.len();

        let buffers: Vec<Result<Vec<f64>>> = pool.install(|| {
            use rayon::prelude::*;
            partitions
                .par_iter()
                .enumerate()
                .map(|(thread_num, part)| {
                    self.build_partition(
                        &table_holder,
                        &subfeature_matrices,
                        &word_indices,
                        index,
                        part,
                        thread_num,
                        &num_completed,
                        total,
                    )
                })
                .collect()
        });

        for (part, buffer) in partitions.iter().zip(buffers) {
            let buffer = buffer?;
            for (k, &rownum) in part.iter().enumerate() {
                for j in 0..ncols {
                    matrix[[rownum, j]] = buffer[k * ncols + j];
                }
            }
        }

        Ok(matrix)
    }

    /// One worker's share of the rows, written row-major into a local
    /// buffer. Writes into the shared matrix happen on the caller thread,
    /// so partitions never contend.
    #[allow(clippy::too_many_arguments)]
    fn build_partition(
        &self,
        table_holder: &TableHolder,
        subfeature_matrices: &[Option<Array2<f64>>],
        word_indices: &[Vec<Arc<WordIndex>>],
        index: &[usize],
        rownums: &[usize],
        thread_num: usize,
        num_completed: &AtomicUsize,
        total: usize,
    ) -> Result<Vec<f64>> {
        let features = self.features();
        let ncols = index.len();

        let condition_fns: Vec<Box<dyn Fn(&Match) -> bool + Send + Sync>> = index
            .iter()
            .map(|&ix| {
                let feature = &features[ix];
                make_condition_fn(&feature.conditions, table_holder.join(feature.peripheral))
            })
            .collect();

        let mut buffer = vec![0.0; rownums.len() * ncols];
        let mut memo = Memoization::new();
        let mut matches: Vec<Vec<Match>> = vec![Vec::new(); table_holder.len()];

        for (k, &rownum) in rownums.iter().enumerate() {
            memo.reset();

            for (join_ix, join) in table_holder.joins().iter().enumerate() {
                matches[join_ix].clear();
                matchmaker::make_matches(join, rownum, &mut matches[join_ix]);
            }

            for (i, &ix) in index.iter().enumerate() {
                let feature = &features[ix];
                let join = table_holder.join(feature.peripheral);

                let value = aggregator::apply_aggregation(
                    join,
                    subfeature_matrices[feature.peripheral].as_ref(),
                    &word_indices[feature.peripheral],
                    &matches[feature.peripheral],
                    condition_fns[i].as_ref(),
                    feature,
                    &mut memo,
                );

                buffer[k * ncols + i] = if value.is_nan() || value.is_infinite() {
                    0.0
                } else {
                    value
                };
            }

            if (k + 1) % LOG_INTERVAL == 0 {
                let completed = num_completed.fetch_add(LOG_INTERVAL, Ordering::Relaxed)
                    + LOG_INTERVAL;
                if thread_num == 0 && !self.hyperparameters.silent {
                    info!(
                        "Built {} rows. Progress: {}%.",
                        completed,
                        (completed * 100) / total
                    );
                }
            }
        }

        num_completed.fetch_add(rownums.len() % LOG_INTERVAL, Ordering::Relaxed);
        Ok(buffer)
    }

    /// Evaluates the nested learners whose outputs the features at `index`
    /// consume. Each returned matrix is peripheral-row-indexed and has the
    /// child's full feature width, with unneeded columns left at zero.
    fn build_subfeatures(
        &self,
        params: &TransformParams<'_>,
        index: &[usize],
    ) -> Result<Vec<Option<Array2<f64>>>> {
        let mut matrices = Vec::with_capacity(self.subfeatures.len());

        for (ix, sub) in self.subfeatures.iter().enumerate() {
            let Some(sub) = sub else {
                matrices.push(None);
                continue;
            };

            let child_name = self.placeholder.joined_tables()[ix].name();
            let new_population = self.find_peripheral(params.peripheral, child_name)?;

            let subfeature_index = self.make_subfeature_index(ix, index);
            if subfeature_index.is_empty() {
                matrices.push(Some(Array2::zeros((new_population.nrows(), 0))));
                continue;
            }

            let small = sub.transform_index(
                &TransformParams {
                    population: new_population,
                    peripheral: params.peripheral,
                },
                &subfeature_index,
                None,
            )?;

            let mut expanded = Array2::zeros((new_population.nrows(), sub.num_features()));
            for (k, &col_ix) in subfeature_index.iter().enumerate() {
                expanded.column_mut(col_ix).assign(&small.column(k));
            }
            matrices.push(Some(expanded));
        }

        Ok(matrices)
    }

    /// The distinct child-feature columns consumed by the features at
    /// `index` for peripheral `peripheral_ix`, sorted.
    fn make_subfeature_index(&self, peripheral_ix: usize, index: &[usize]) -> Vec<usize> {
        let features = self.features();
        let mut cols: Vec<usize> = index
            .iter()
            .map(|&ix| &features[ix])
            .filter(|f| f.data_used == DataUsed::Subfeatures && f.peripheral == peripheral_ix)
            .map(|f| f.input_col)
            .collect();
        cols.sort_unstable();
        cols.dedup();
        cols
    }

    fn make_word_indices(&self, table_holder: &TableHolder) -> Vec<Vec<Arc<WordIndex>>> {
        table_holder
            .joins()
            .iter()
            .enumerate()
            .map(|(ix, join)| {
                (0..join.peripheral.num_text())
                    .map(|col| {
                        Arc::new(WordIndex::new(
                            join.peripheral.text(col),
                            &self.vocabularies[ix][col],
                        ))
                    })
                    .collect()
            })
            .collect()
    }

    // ------------------------------------------------------------------
    // Importances

    /// Distributes per-feature importance factors onto the columns each
    /// feature touches, recursing through the subfeature tree. The total
    /// mass is conserved.
    pub fn column_importances(&self, importance_factors: &[f64]) -> ImportanceMaker {
        let mut maker = ImportanceMaker::new();

        let mut subfactors: Vec<Vec<f64>> = self
            .subfeatures
            .iter()
            .map(|sub| {
                sub.as_ref()
                    .map(|s| vec![0.0; s.num_features()])
                    .unwrap_or_default()
            })
            .collect();

        for (ix, &factor) in importance_factors.iter().enumerate() {
            if ix >= self.num_features() || factor == 0.0 {
                continue;
            }
            self.infer_importance(ix, factor, &mut maker, &mut subfactors);
        }

        for (ix, sub) in self.subfeatures.iter().enumerate() {
            if let Some(sub) = sub {
                let mut child = sub.column_importances(&subfactors[ix]);
                child.transfer_population(self.placeholder.joined_tables()[ix].name());
                maker.merge(&child);
            }
        }

        maker
    }

    fn infer_importance(
        &self,
        feature_num: usize,
        factor: f64,
        maker: &mut ImportanceMaker,
        subfactors: &mut [Vec<f64>],
    ) {
        let feature = &self.features()[feature_num];
        let peripheral = &self.peripheral_schemas[feature.peripheral];
        let population = self
            .population_schema
            .as_ref()
            .cloned()
            .unwrap_or_default();

        let half = factor * 0.5;

        match feature.data_used {
            DataUsed::Categorical => maker.add(
                ColumnDescription::new(
                    Marker::Peripheral,
                    &peripheral.name,
                    &peripheral.categoricals[feature.input_col],
                ),
                factor,
            ),
            DataUsed::Discrete => maker.add(
                ColumnDescription::new(
                    Marker::Peripheral,
                    &peripheral.name,
                    &peripheral.discretes[feature.input_col],
                ),
                factor,
            ),
            DataUsed::Numerical => maker.add(
                ColumnDescription::new(
                    Marker::Peripheral,
                    &peripheral.name,
                    &peripheral.numericals[feature.input_col],
                ),
                factor,
            ),
            DataUsed::Na => {
                // COUNT-style features touch no value column; the join key
                // that produced the match set receives the mass so that the
                // total stays conserved.
                let spec = self.placeholder.join_spec(feature.peripheral);
                maker.add(
                    ColumnDescription::new(
                        Marker::Peripheral,
                        &peripheral.name,
                        &spec.other_join_key,
                    ),
                    factor,
                );
            }
            DataUsed::SameUnitsCategorical => {
                maker.add(
                    ColumnDescription::new(
                        Marker::Peripheral,
                        &peripheral.name,
                        &peripheral.categoricals[feature.input_col],
                    ),
                    half,
                );
                maker.add(
                    ColumnDescription::new(
                        Marker::Population,
                        &population.name,
                        &population.categoricals[feature.output_col],
                    ),
                    half,
                );
            }
            DataUsed::SameUnitsDiscrete | DataUsed::SameUnitsDiscreteTs => {
                maker.add(
                    ColumnDescription::new(
                        Marker::Peripheral,
                        &peripheral.name,
                        &peripheral.discretes[feature.input_col],
                    ),
                    half,
                );
                maker.add(
                    ColumnDescription::new(
                        Marker::Population,
                        &population.name,
                        &population.discretes[feature.output_col],
                    ),
                    half,
                );
            }
            DataUsed::SameUnitsNumerical | DataUsed::SameUnitsNumericalTs => {
                maker.add(
                    ColumnDescription::new(
                        Marker::Peripheral,
                        &peripheral.name,
                        &peripheral.numericals[feature.input_col],
                    ),
                    half,
                );
                maker.add(
                    ColumnDescription::new(
                        Marker::Population,
                        &population.name,
                        &population.numericals[feature.output_col],
                    ),
                    half,
                );
            }
            DataUsed::Subfeatures => {
                subfactors[feature.peripheral][feature.input_col] += factor;
            }
            DataUsed::Text => maker.add(
                ColumnDescription::new(
                    Marker::Peripheral,
                    &peripheral.name,
                    &peripheral.text[feature.input_col],
                ),
                factor,
            ),
        }
    }
}

/// Whether a column's unit excludes it from direct aggregation.
fn is_comparison_only(unit: &str) -> bool {
    unit.contains("comparison only")
}

/// Whether a column is a time stamp travelling as a discrete or numerical.
fn is_ts(name: &str, unit: &str) -> bool {
    !name.contains(macros::ROWID) && unit.contains("time stamp")
}

/// Splits rows into `num_threads` contiguous partitions; the first
/// partitions absorb the remainder.
fn partition_rows(rownums: &[usize], num_threads: usize) -> Vec<Vec<usize>> {
    let n = rownums.len();
    let threads = num_threads.max(1).min(n.max(1));
    let base = n / threads;
    let remainder = n % threads;

    let mut partitions = Vec::with_capacity(threads);
    let mut begin = 0;
    for t in 0..threads {
        let len = base + usize::from(t < remainder);
        partitions.push(rownums[begin..begin + len].to_vec());
        begin += len;
    }
    partitions.retain(|p| !p.is_empty());
    partitions
}
