//! Pairwise cross-features over account attributes.
//!
//! Each unordered pair of the five raw account attributes is multiplied and
//! the product column is rescaled into `[0, normalize_to]` by its maximum on
//! the training split. The maxima are fitted once and reused unchanged for
//! validation, test and inference rows.

use crate::error::{ForecastError, Result};
use ndarray::{Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

/// Number of raw account attributes per tweet.
pub const ATTRIBUTE_COUNT: usize = 5;

/// Number of cross-features: one per unordered attribute pair.
pub const CROSS_FEATURE_COUNT: usize = ATTRIBUTE_COUNT * (ATTRIBUTE_COUNT - 1) / 2;

/// Raw attributes of the posting account.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AccountAttributes {
    pub friends_count: f64,
    pub followers_count: f64,
    pub account_age: f64,
    pub total_tweet_count: f64,
    pub favourited_tweet_count: f64,
}

impl AccountAttributes {
    pub fn to_array(&self) -> [f64; ATTRIBUTE_COUNT] {
        [
            self.friends_count,
            self.followers_count,
            self.account_age,
            self.total_tweet_count,
            self.favourited_tweet_count,
        ]
    }
}

/// Attribute index pairs `(i, j)` with `i < j`, in column order.
pub fn attribute_pairs() -> impl Iterator<Item = (usize, usize)> {
    (0..ATTRIBUTE_COUNT).flat_map(|i| (i + 1..ATTRIBUTE_COUNT).map(move |j| (i, j)))
}

/// Unscaled pairwise products for an `(n, 5)` attribute matrix.
pub fn cross_products(attributes: ArrayView2<f64>) -> Result<Array2<f64>> {
    if attributes.ncols() != ATTRIBUTE_COUNT {
        return Err(ForecastError::shape_mismatch(
            "account attribute columns",
            ATTRIBUTE_COUNT,
            attributes.ncols(),
        ));
    }

    let mut products = Array2::zeros((attributes.nrows(), CROSS_FEATURE_COUNT));
    for (col, (i, j)) in attribute_pairs().enumerate() {
        let product = &attributes.column(i) * &attributes.column(j);
        products.column_mut(col).assign(&product);
    }
    Ok(products)
}

/// Column maxima of the training cross-features plus the target ceiling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossFeatureScaler {
    /// Maximum of each product column on the split the scaler was fitted on
    pub maxima: Vec<f64>,
    /// Upper end of the rescaled range
    pub normalize_to: f64,
}

impl CrossFeatureScaler {
    /// Fit the column maxima on the training attributes.
    pub fn fit(attributes: ArrayView2<f64>, normalize_to: f64) -> Result<Self> {
        if attributes.nrows() == 0 {
            return Err(ForecastError::shape_mismatch(
                "cross-feature fit rows (at least)",
                1,
                0,
            ));
        }

        let products = cross_products(attributes)?;
        let maxima = products
            .axis_iter(Axis(1))
            .map(|column| column.fold(f64::NEG_INFINITY, |a, &b| a.max(b)))
            .collect();

        Ok(CrossFeatureScaler {
            maxima,
            normalize_to,
        })
    }

    /// Number of output features.
    pub fn feature_count(&self) -> usize {
        self.maxima.len()
    }

    /// Cross and rescale an `(n, 5)` attribute matrix with the fitted maxima.
    ///
    /// A column whose training maximum is zero stays zero.
    pub fn transform(&self, attributes: ArrayView2<f64>) -> Result<Array2<f64>> {
        if self.maxima.len() != CROSS_FEATURE_COUNT {
            return Err(ForecastError::shape_mismatch(
                "cross-feature maxima",
                CROSS_FEATURE_COUNT,
                self.maxima.len(),
            ));
        }
        let mut products = cross_products(attributes)?;
        for (mut column, &max) in products.axis_iter_mut(Axis(1)).zip(self.maxima.iter()) {
            if max > 0.0 {
                column.mapv_inplace(|v| v / max * self.normalize_to);
            } else {
                column.fill(0.0);
            }
        }
        Ok(products)
    }

    /// Cross and rescale a single account.
    pub fn transform_one(&self, account: &AccountAttributes) -> Result<Vec<f64>> {
        let row = Array2::from_shape_vec((1, ATTRIBUTE_COUNT), account.to_array().to_vec())
            .map_err(|e| ForecastError::Config(e.to_string()))?;
        Ok(self.transform(row.view())?.row(0).to_vec())
    }
}
