// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Regression training through the full stack: parameters registered in a
//! model, lazy graphs rebuilt per step, gradients pushed back into the
//! parameters, and an optimizer applying them.

use st_graph::{device, graph, ops};
use st_model::{Adam, Graph, Model, Naive, Optimizer, Parameter, Sgd, Shape};

const XS: [f32; 4] = [-1.0, 0.0, 0.5, 1.0];
const TRUE_W: f32 = 2.0;
const TRUE_B: f32 = 0.5;

fn setup() -> (Model, Parameter, Parameter) {
    device::set_default(Naive::with_seed(7));
    let model = Model::new();
    let w = Parameter::from_values(Shape::new(&[1], 1).unwrap(), vec![0.0]).unwrap();
    let b = Parameter::from_values(Shape::new(&[1], 1).unwrap(), vec![0.0]).unwrap();
    model.add_parameter("w", &w).unwrap();
    model.add_parameter("b", &b).unwrap();
    (model, w, b)
}

// Mean squared error of w*x + b over one minibatch of XS.
fn step_loss(w: &Parameter, b: &Parameter) -> f32 {
    let g = Graph::new();
    graph::set_default(&g);

    let shape = Shape::new(&[1], XS.len() as u32).unwrap();
    let x = ops::input(shape.clone(), XS.to_vec()).unwrap();
    let t = ops::input(
        shape,
        XS.iter().map(|x| TRUE_W * x + TRUE_B).collect(),
    )
    .unwrap();

    let pred = w.node().unwrap().mul(&x).unwrap().add(&b.node().unwrap()).unwrap();
    let diff = pred.sub(&t).unwrap();
    let loss = diff
        .mul(&diff)
        .unwrap()
        .batch_sum()
        .unwrap()
        .mul_const(1.0 / XS.len() as f32)
        .unwrap();

    loss.backward().unwrap();
    loss.to_vec().unwrap()[0]
}

#[test]
fn sgd_fits_a_line() {
    let (model, w, b) = setup();
    let mut opt = Sgd::new(0.3);

    let first = step_loss(&w, &b);
    opt.update(&model).unwrap();
    let mut last = first;
    for _ in 0..200 {
        last = step_loss(&w, &b);
        opt.update(&model).unwrap();
    }

    assert!(last < first);
    assert!(last < 1e-4, "final loss {last}");
    assert!((w.value().unwrap().data()[0] - TRUE_W).abs() < 1e-2);
    assert!((b.value().unwrap().data()[0] - TRUE_B).abs() < 1e-2);
}

#[test]
fn adam_fits_a_line() {
    let (model, w, b) = setup();
    let mut opt = Adam::new(0.05, 0.9, 0.999, 1e-8);

    let first = step_loss(&w, &b);
    opt.update(&model).unwrap();
    let mut last = first;
    for _ in 0..500 {
        last = step_loss(&w, &b);
        opt.update(&model).unwrap();
    }

    assert!(last < first);
    assert!(last < 1e-2, "final loss {last}");
    assert!(w.has_stats("adam-m1").unwrap());
    assert!(w.has_stats("adam-m2").unwrap());
}

#[test]
fn gradients_from_two_graphs_accumulate_until_the_update() {
    let (model, w, _b) = setup();

    let run = |scale: f32| {
        let g = Graph::new();
        graph::set_default(&g);
        let x = ops::input(Shape::new(&[1], 1).unwrap(), vec![scale]).unwrap();
        let y = w.node().unwrap().mul(&x).unwrap();
        y.backward().unwrap();
    };
    run(2.0);
    run(3.0);
    assert_eq!(w.gradient().unwrap().data(), &[5.0]);

    let mut opt = Sgd::new(1.0);
    opt.update(&model).unwrap();
    assert_eq!(w.value().unwrap().data(), &[-5.0]);
    assert_eq!(w.gradient().unwrap().data(), &[0.0]);
}
