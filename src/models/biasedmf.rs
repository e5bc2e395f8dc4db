//! Biased matrix factorization: `r̂ = μ + b_u + b_i + ⟨P[u], Q[i]⟩`.
use super::iterative::{ExampleLoss, Factors, SgdModel};
use super::HyperParams;
use data::SparseMatrix;
use {ItemId, UserId};

/// Matrix factorization with a global mean and user and item biases.
///
/// User biases and factors are regularized with `reg_u`, item biases and
/// factors with `reg_i`.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct BiasedMf {
    global_mean: f64,
}

impl BiasedMf {
    /// A model with a zero global mean, set when training starts.
    pub fn new() -> Self {
        BiasedMf::default()
    }

    /// Mean of the training ratings.
    pub fn global_mean(&self) -> f64 {
        self.global_mean
    }
}

impl SgdModel for BiasedMf {
    fn name(&self) -> &'static str {
        "BiasedMF"
    }

    fn has_biases(&self) -> bool {
        true
    }

    fn prepare(&mut self, train: &SparseMatrix) {
        self.global_mean = train.mean();
    }

    fn predict(&self, factors: &Factors, user: UserId, item: ItemId) -> f64 {
        self.global_mean + factors.user_bias(user) + factors.item_bias(item) + factors.dot(user, item)
    }

    fn update_on_example(
        &self,
        factors: &mut Factors,
        hyper: &HyperParams,
        learning_rate: f64,
        user: UserId,
        item: ItemId,
        rating: f64,
    ) -> ExampleLoss {
        let error = rating - self.predict(factors, user, item);
        let mut loss = error * error;

        if let Some(ref mut biases) = factors.user_biases {
            let bias = biases.get(user);
            biases.add(user, learning_rate * (error - hyper.reg_u * bias));
            loss += hyper.reg_u * bias * bias;
        }
        if let Some(ref mut biases) = factors.item_biases {
            let bias = biases.get(item);
            biases.add(item, learning_rate * (error - hyper.reg_i * bias));
            loss += hyper.reg_i * bias * bias;
        }

        loss += factors.sgd_step(user, item, error, learning_rate, hyper.reg_u, hyper.reg_i);

        ExampleLoss {
            squared_error: error * error,
            loss: loss,
        }
    }
}
