//! Regularized SVD: `r̂ = ⟨P[u], Q[i]⟩`.
use super::iterative::{ExampleLoss, Factors, SgdModel};
use super::HyperParams;
use {ItemId, UserId};

/// Plain regularized matrix factorization without biases.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct RegSvd;

impl SgdModel for RegSvd {
    fn name(&self) -> &'static str {
        "RegSVD"
    }

    fn predict(&self, factors: &Factors, user: UserId, item: ItemId) -> f64 {
        factors.dot(user, item)
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
        let penalty = factors.sgd_step(user, item, error, learning_rate, hyper.reg_u, hyper.reg_i);

        ExampleLoss {
            squared_error: error * error,
            loss: error * error + penalty,
        }
    }
}

#[cfg(test)]
mod tests {
    use rand::distributions::{Distribution, Normal, Uniform};

    use super::*;
    use data::{seeded_rng, SparseMatrix};
    use models::{InitStrategy, IterativeRecommender};
    use Recommender;

    /// A 100 x 100 rank-3 matrix at 5% density with 5% multiplicative
    /// Gaussian noise. Every user rates five items; the fifth is held out.
    fn synthetic_rank_three() -> (SparseMatrix, SparseMatrix) {
        let mut rng = seeded_rng(2018, 0);
        let uniform = Uniform::new(0.4, 0.6);
        let noise = Normal::new(0.0, 0.05);

        let users: Vec<Vec<f64>> = (0..100)
            .map(|_| (0..3).map(|_| uniform.sample(&mut rng)).collect())
            .collect();
        let items: Vec<Vec<f64>> = (0..100)
            .map(|_| (0..3).map(|_| uniform.sample(&mut rng)).collect())
            .collect();

        let mut train = Vec::new();
        let mut test = Vec::new();

        for user in 0..100 {
            for j in 0..5 {
                let item = (7 * user + 20 * j) % 100;
                let rating: f64 = izip!(&users[user], &items[item]).map(|(p, q)| p * q).sum();
                let rating = rating * (1.0 + noise.sample(&mut rng));

                if j == 4 {
                    test.push((user, item, rating));
                } else {
                    train.push((user, item, rating));
                }
            }
        }

        (
            SparseMatrix::from_triplets(100, 100, train).unwrap(),
            SparseMatrix::from_triplets(100, 100, test).unwrap(),
        )
    }

    #[test]
    fn fits_synthetic_low_rank_data() {
        let (train, test) = synthetic_rank_three();
        assert_eq!(train.size() + test.size(), 500);

        let hyper = HyperParams::new()
            .num_factors(3)
            .learning_rate(0.01)
            .regularization(0.02)
            .max_iters(200)
            .init(InitStrategy::Gaussian {
                mean: 0.0,
                std: 0.1,
            })
            .seed(7);
        let mut model = IterativeRecommender::new(RegSvd, hyper);
        model.fit(&train).unwrap();

        let squared_error: f64 = test.iter()
            .map(|entry| {
                let error = entry.value - model.predict(entry.row, entry.column).unwrap();
                error * error
            })
            .sum();
        let rmse = (squared_error / test.size() as f64).sqrt();
        assert!(rmse < 0.2, "Test RMSE too high: {}", rmse);

        let losses = &model.state().loss_history;
        let tail = &losses[losses.len().saturating_sub(50)..];
        assert!(tail.windows(2).all(|pair| pair[1] <= pair[0] * (1.0 + 1e-4)));
    }

    #[test]
    fn update_follows_the_gradient() {
        let train = SparseMatrix::from_triplets(1, 1, vec![(0, 0, 1.0)]).unwrap();
        let mut model = IterativeRecommender::new(RegSvd, HyperParams::new().num_factors(2));
        model.init_model(&train).unwrap();

        let mut factors = model.factors().unwrap().clone();
        let before = factors.dot(0, 0);
        let hyper = HyperParams::new().regularization(0.0);

        let example = RegSvd.update_on_example(&mut factors, &hyper, 0.1, 0, 0, 1.0);

        assert_eq!(example.squared_error, (1.0 - before) * (1.0 - before));
        assert_eq!(example.loss, example.squared_error);
        assert!((1.0 - factors.dot(0, 0)).abs() < (1.0 - before).abs());
    }
}
