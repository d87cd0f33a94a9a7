//! The pixel optimization loop.
//!
//! An L-BFGS search over the working image's pixel values, and nothing else:
//! the extractor's parameters are frozen and never see a gradient. The loop
//! follows the classic recipe for this problem - clamp the working image to
//! the color domain before every evaluation, read the probe losses off the
//! truncated feature walk, backpropagate to the pixels, take a quasi-Newton
//! step. Termination is purely iteration-count-based; there is deliberately
//! no convergence test and no guard against a non-finite objective, callers
//! observe degenerate runs through the reported losses.

use std::collections::VecDeque;

use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::{ElementConversion, Tensor};
use log::debug;

use crate::loss::LossModel;
use crate::session::{ProgressUpdate, RunStats, TransferProgress};

/// Curvature history length for the quasi-Newton direction.
const LBFGS_MEMORY: usize = 7;
/// Minimum `s . y` admitted into the curvature history.
const CURVATURE_EPS: f32 = 1e-10;
/// Evaluations between log lines.
const REPORT_EVERY: usize = 50;

/// One admitted curvature pair, `s = x_k+1 - x_k`, `y = g_k+1 - g_k`,
/// `rho = 1 / (y . s)`.
struct CurvaturePair<B: AutodiffBackend> {
    s: Tensor<B::InnerBackend, 1>,
    y: Tensor<B::InnerBackend, 1>,
    rho: f32,
}

/// Explicit per-run loop state: the working image, the evaluation counter
/// and the most recent weighted losses.
struct RunState<B: AutodiffBackend> {
    image: Tensor<B, 4>,
    evals: usize,
    style_loss: f32,
    content_loss: f32,
}

pub(crate) struct PixelOptimizer<'a, B: AutodiffBackend> {
    model: &'a LossModel<'a, B>,
    style_weight: f32,
    content_weight: f32,
    history: VecDeque<CurvaturePair<B>>,
    prev_point: Option<Tensor<B::InnerBackend, 1>>,
    prev_grad: Option<Tensor<B::InnerBackend, 1>>,
}

impl<'a, B: AutodiffBackend> PixelOptimizer<'a, B> {
    pub(crate) fn new(
        model: &'a LossModel<'a, B>,
        style_weight: f32,
        content_weight: f32,
    ) -> Self {
        Self {
            model,
            style_weight,
            content_weight,
            history: VecDeque::with_capacity(LBFGS_MEMORY),
            prev_point: None,
            prev_grad: None,
        }
    }

    /// Runs the full optimization over a copy of the content tensor and
    /// returns the finalized image together with the last observed losses.
    pub(crate) fn run(
        mut self,
        content: Tensor<B, 4>,
        budget: usize,
        mut progress: Option<Box<dyn TransferProgress>>,
    ) -> (Tensor<B, 4>, RunStats) {
        let mut state = RunState {
            image: content,
            evals: 0,
            style_loss: 0.0,
            content_loss: 0.0,
        };

        // Non-strict comparison at the loop head: the budget admits one
        // extra evaluation, matching the classic formulation.
        while state.evals <= budget {
            self.step(&mut state, budget, &mut progress);
        }

        let image = state.image.clamp(0.0, 1.0);
        let stats = RunStats {
            iterations: state.evals,
            style_loss: state.style_loss,
            content_loss: state.content_loss,
        };

        (image, stats)
    }

    /// One optimizer step: a single objective evaluation followed by a
    /// quasi-Newton update of the working image.
    fn step(
        &mut self,
        state: &mut RunState<B>,
        budget: usize,
        progress: &mut Option<Box<dyn TransferProgress>>,
    ) {
        let grad = match self.evaluate(state, budget, progress) {
            Some(grad) => grad,
            // no probes anywhere, nothing to move the image
            None => return,
        };

        let dims = state.image.dims();
        let n = dims.iter().product::<usize>();
        let point = state.image.clone().inner().reshape([n]);
        let grad = grad.reshape([n]);

        if let (Some(prev_point), Some(prev_grad)) = (self.prev_point.take(), self.prev_grad.take())
        {
            let s = point.clone() - prev_point;
            let y = grad.clone() - prev_grad;
            let ys = dot(&y, &s);
            if ys > CURVATURE_EPS {
                if self.history.len() == LBFGS_MEMORY {
                    self.history.pop_front();
                }
                self.history.push_back(CurvaturePair {
                    s,
                    y,
                    rho: 1.0 / ys,
                });
            }
        }

        let grad_l1: f32 = grad.clone().abs().sum().into_scalar().elem();
        self.prev_point = Some(point.clone());
        self.prev_grad = Some(grad.clone());

        // stationary point, the direction and the step would both be zero
        if grad_l1 == 0.0 {
            return;
        }

        let direction = self.direction(grad);
        let step_size = if state.evals == 1 {
            1.0f32.min(1.0 / grad_l1)
        } else {
            1.0
        };

        let next = point + direction.mul_scalar(step_size);
        state.image = Tensor::from_inner(next.reshape(dims));
    }

    /// Evaluates the objective at the (clamped) working image, increments
    /// the counter, reports progress and returns the pixel gradient.
    fn evaluate(
        &self,
        state: &mut RunState<B>,
        budget: usize,
        progress: &mut Option<Box<dyn TransferProgress>>,
    ) -> Option<Tensor<B::InnerBackend, 4>> {
        // Clamp in place before evaluation so feature extraction never sees
        // values outside the color domain.
        state.image = state.image.clone().clamp(0.0, 1.0);

        let (grad, style_loss, content_loss) = if self.model.has_probes() {
            let image = state.image.clone().require_grad();
            let readout = self.model.evaluate(image.clone());

            let style = readout.style.mul_scalar(self.style_weight);
            let content = readout.content.mul_scalar(self.content_weight);
            let objective = style.clone() + content.clone();

            // Gradients are recomputed from scratch by every backward call,
            // there is no accumulated state to zero between evaluations.
            let grads = objective.backward();
            let grad = image.grad(&grads);

            (
                grad,
                style.into_scalar().elem::<f32>(),
                content.into_scalar().elem::<f32>(),
            )
        } else {
            (None, 0.0, 0.0)
        };

        state.evals += 1;
        state.style_loss = style_loss;
        state.content_loss = content_loss;

        if state.evals % REPORT_EVERY == 0 {
            debug!(
                "iteration {}: style loss {:.4}, content loss {:.4}",
                state.evals, style_loss, content_loss
            );
        }

        if let Some(progress) = progress {
            progress.update(ProgressUpdate {
                iteration: state.evals,
                total: budget + 1,
                style_loss,
                content_loss,
            });
        }

        grad
    }

    /// Two-loop recursion over the curvature history, with the usual
    /// `s . y / y . y` scaling of the implicit initial Hessian.
    fn direction(&self, grad: Tensor<B::InnerBackend, 1>) -> Tensor<B::InnerBackend, 1> {
        let mut q = grad;
        let mut alphas = Vec::with_capacity(self.history.len());

        for pair in self.history.iter().rev() {
            let alpha = pair.rho * dot(&pair.s, &q);
            q = q - pair.y.clone().mul_scalar(alpha);
            alphas.push(alpha);
        }

        let gamma = self.history.back().map_or(1.0, |pair| {
            let yy = dot(&pair.y, &pair.y);
            if yy > 0.0 {
                1.0 / (pair.rho * yy)
            } else {
                1.0
            }
        });

        let mut r = q.mul_scalar(gamma);
        for (pair, &alpha) in self.history.iter().zip(alphas.iter().rev()) {
            let beta = pair.rho * dot(&pair.y, &r);
            r = r + pair.s.clone().mul_scalar(alpha - beta);
        }

        r.neg()
    }
}

fn dot<B: Backend>(a: &Tensor<B, 1>, b: &Tensor<B, 1>) -> f32 {
    (a.clone() * b.clone()).sum().into_scalar().elem()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::extractor::Extractor;
    use crate::loss::LossModel;
    use burn::tensor::TensorData;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    type TestBackend = burn::backend::Autodiff<burn::backend::NdArray<f32>>;

    fn device() -> <TestBackend as Backend>::Device {
        Default::default()
    }

    fn test_image(side: usize, offset: f32) -> Tensor<TestBackend, 4> {
        let n = 3 * side * side;
        let data: Vec<f32> = (0..n).map(|i| ((i as f32 * 0.37 + offset) % 1.0)).collect();
        Tensor::from_data(TensorData::new(data, [1, 3, side, side]), &device())
    }

    #[test]
    fn no_probes_leave_the_image_untouched() {
        let extractor = Extractor::<TestBackend>::new(&device());
        let content = test_image(8, 0.1);
        let style = test_image(8, 0.6);

        let model = LossModel::build(&extractor, &style, &content, &[], &[]);
        let optimizer = PixelOptimizer::new(&model, 1_000_000.0, 1.0);

        let (result, stats) = optimizer.run(content.clone(), 3, None);

        // inputs are already inside [0, 1], so even the clamps are identity
        let expected = content.into_data().to_vec::<f32>().unwrap();
        let actual = result.into_data().to_vec::<f32>().unwrap();
        assert_eq!(expected, actual);
        assert_eq!(stats.iterations, 4);
    }

    #[test]
    fn counter_admits_budget_plus_one_evaluations() {
        let extractor = Extractor::<TestBackend>::new(&device());
        let content = test_image(8, 0.1);
        let style = test_image(8, 0.6);

        let model = LossModel::build(&extractor, &style, &content, &[0], &[]);
        let optimizer = PixelOptimizer::new(&model, 0.0, 1.0);

        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();
        let progress: Box<dyn TransferProgress> = Box::new(move |info: ProgressUpdate| {
            seen.fetch_add(1, Ordering::SeqCst);
            assert!(info.iteration <= info.total);
        });

        let (_, stats) = optimizer.run(content, 4, Some(progress));

        assert_eq!(count.load(Ordering::SeqCst), 5);
        assert_eq!(stats.iterations, 5);
    }

    #[test]
    fn working_image_stays_in_the_color_domain() {
        let extractor = Extractor::<TestBackend>::new(&device());
        let content = test_image(8, 0.1);
        let style = test_image(8, 0.6);

        let model = LossModel::build(&extractor, &style, &content, &[0], &[0, 2]);
        let optimizer = PixelOptimizer::new(&model, 1_000_000.0, 1.0);

        let (result, _) = optimizer.run(content, 5, None);

        let data = result.into_data().to_vec::<f32>().unwrap();
        assert!(data.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn content_only_objective_is_already_minimal() {
        let extractor = Extractor::<TestBackend>::new(&device());
        let content = test_image(8, 0.1);
        let style = test_image(8, 0.6);

        // style weight zero: the content term starts at its optimum, the
        // gradient vanishes and no step is ever taken
        let model = LossModel::build(&extractor, &style, &content, &[0], &[0]);
        let optimizer = PixelOptimizer::new(&model, 0.0, 1.0);

        let (result, stats) = optimizer.run(content.clone(), 5, None);

        let expected = content.into_data().to_vec::<f32>().unwrap();
        let actual = result.into_data().to_vec::<f32>().unwrap();
        for (a, b) in expected.iter().zip(actual.iter()) {
            assert!((a - b).abs() < 1e-6);
        }
        assert!(stats.content_loss < 1e-6);
    }
}
