use std::{
    num::NonZeroUsize,
    sync::{Arc, Mutex},
    time::Duration,
};

use comms::{
    OnoReceiver, OnoSender,
    msg::{Command, FailureKind, Msg},
    specs::{
        plan::{Pass, PassSpec},
        recon::{ReconSpec, SweepParameter},
        region::Region,
        run::RunContext,
    },
};
use tokio::io::{self, DuplexStream, ReadHalf, WriteHalf};
use worker::{
    Result, Worker, WorkerErr,
    engine::{Property, RecordingGraph, TaskGraph, TaskId},
    probe::{GpuDescriptor, StaticProbe},
};

type Rx = OnoReceiver<ReadHalf<DuplexStream>>;
type Tx = OnoSender<WriteHalf<DuplexStream>>;

const GIB: u64 = 1 << 30;

fn channel_pair() -> ((Rx, Tx), (Rx, Tx)) {
    let (stream1, stream2) = io::duplex(4096);
    let (rx1, tx1) = io::split(stream1);
    let (rx2, tx2) = io::split(stream2);
    (comms::channel(rx1, tx1), comms::channel(rx2, tx2))
}

/// Lets the test look at the graph after the worker consumed its engine.
#[derive(Clone, Default)]
struct SharedGraph(Arc<Mutex<RecordingGraph>>);

impl TaskGraph for SharedGraph {
    fn get_task(&mut self, plugin: &str) -> Result<TaskId> {
        self.0.lock().unwrap().get_task(plugin)
    }

    fn set_property(&mut self, task: TaskId, key: &str, value: Property) -> Result<()> {
        self.0.lock().unwrap().set_property(task, key, value)
    }

    fn connect_input(&mut self, from: TaskId, to: TaskId, port: usize) -> Result<()> {
        self.0.lock().unwrap().connect_input(from, to, port)
    }

    fn set_device(&mut self, task: TaskId, gpu: usize) -> Result<()> {
        self.0.lock().unwrap().set_device(task, gpu)
    }

    fn run(&mut self) -> Result<Duration> {
        self.0.lock().unwrap().run()
    }
}

fn gpus(n: usize) -> Vec<GpuDescriptor> {
    (0..n)
        .map(|i| GpuDescriptor::new(format!("gpu{i}"), 8 * GIB, 2 * GIB))
        .collect()
}

fn worker(num_gpus: usize, graph: SharedGraph) -> Worker {
    Worker::new(Box::new(StaticProbe::new(gpus(num_gpus))), Box::new(graph))
}

fn spec() -> ReconSpec {
    ReconSpec {
        input: "/data/projections".into(),
        darks: None,
        flats: None,
        output: "/data/slices/slice".into(),
        overall_angle: 360.0,
        angle: 0.5,
        projection_step: 1,
        number: 720,
        width: 512,
        height: 512,
        y: 0,
        axis: 256.0,
        lamino_angle: 30.0,
        roll_angle: 0.0,
        z: 0.0,
        z_parameter: SweepParameter::Z,
        x_region: None,
        y_region: None,
        region: Some(Region::new(-10.0, 10.0, 1.0)),
        slices_per_device: NonZeroUsize::new(4),
        dry_run: true,
    }
}

fn execute(pass: usize, chunks: Vec<Region>, num_gpus: usize) -> Command {
    Command::Execute {
        run: RunContext::with_id("test"),
        job: PassSpec {
            spec: spec(),
            x_region: Region::centered(512),
            y_region: Region::centered(512),
            num_gpus,
            pass: Pass {
                index: pass,
                chunks,
            },
        },
    }
}

/// Sends `request` to `worker` and returns its reply along with what `serve` returned.
async fn roundtrip(worker: Worker, request: Command) -> (Command, Result<()>) {
    let ((mut drv_rx, mut drv_tx), (wk_rx, wk_tx)) = channel_pair();

    let worker_fut = worker.serve(wk_rx, wk_tx);
    let driver_fut = async move {
        drv_tx.send(&Msg::Control(request)).await.unwrap();

        let mut rx_buf = Vec::new();
        let reply = match drv_rx.recv_into(&mut rx_buf).await.unwrap() {
            Msg::Control(reply) => reply,
            other => panic!("unexpected message {other:?}"),
        };

        // One reply, then the worker hangs up.
        let eof = drv_rx.recv_into::<Msg>(&mut rx_buf).await.unwrap_err();
        assert_eq!(eof.kind(), std::io::ErrorKind::UnexpectedEof);

        reply
    };

    let (served, reply) = tokio::join!(worker_fut, driver_fut);
    (reply, served)
}

#[tokio::test]
async fn discover_replies_with_the_plan() {
    let request = Command::Discover {
        run: RunContext::with_id("test"),
        spec: spec(),
    };

    let (reply, served) = roundtrip(worker(2, SharedGraph::default()), request).await;
    served.unwrap();

    let Command::Planned(plan) = reply else {
        panic!("expected a plan, got {}", reply.kind());
    };

    assert_eq!(plan.num_gpus, 2);
    assert_eq!(plan.slices_per_device, 4);
    let sizes: Vec<_> = plan.passes.iter().map(|pass| pass.chunks.len()).collect();
    assert_eq!(sizes, vec![2, 2, 1]);
}

#[tokio::test]
async fn discover_without_gpus_is_a_planning_failure() {
    let request = Command::Discover {
        run: RunContext::with_id("test"),
        spec: spec(),
    };

    let (reply, served) = roundtrip(worker(0, SharedGraph::default()), request).await;

    assert!(matches!(
        reply,
        Command::Failed {
            kind: FailureKind::Planning,
            ..
        }
    ));
    assert!(matches!(served, Err(WorkerErr::Planning(_))));
}

#[tokio::test]
async fn empty_region_is_a_configuration_failure() {
    let mut spec = spec();
    spec.region = Some(Region::new(3.0, 3.0, 1.0));
    let request = Command::Discover {
        run: RunContext::with_id("test"),
        spec,
    };

    let (reply, _) = roundtrip(worker(1, SharedGraph::default()), request).await;

    assert!(matches!(
        reply,
        Command::Failed {
            kind: FailureKind::Configuration,
            ..
        }
    ));
}

#[tokio::test]
async fn execute_builds_and_runs_the_pass() {
    let graph = SharedGraph::default();
    let chunks = vec![Region::new(-2.0, 2.0, 1.0), Region::new(2.0, 6.0, 1.0)];

    let (reply, served) = roundtrip(worker(2, graph.clone()), execute(1, chunks, 2)).await;
    served.unwrap();

    let Command::Executed { pass, seconds } = reply else {
        panic!("expected an execution report, got {}", reply.kind());
    };
    assert_eq!(pass, 1);
    assert!(seconds >= 0.0);

    let engine = graph.0.lock().unwrap();
    assert_eq!(engine.runs(), 1);
    assert_eq!(engine.graph().find("lamino-backproject").len(), 2);
    assert_eq!(engine.graph().find("dummy-data").len(), 1);
}

#[tokio::test]
async fn execute_with_too_few_gpus_fails() {
    let graph = SharedGraph::default();
    let chunks = vec![Region::new(-2.0, 2.0, 1.0), Region::new(2.0, 6.0, 1.0)];

    let (reply, served) = roundtrip(worker(1, graph.clone()), execute(0, chunks, 2)).await;

    let Command::Failed { kind, detail } = reply else {
        panic!("expected a failure, got {}", reply.kind());
    };
    assert_eq!(kind, FailureKind::Execution);
    assert!(detail.contains("2 chunks"), "{detail}");
    assert!(matches!(served, Err(WorkerErr::Assignment { .. })));
    assert_eq!(graph.0.lock().unwrap().runs(), 0);
}

#[tokio::test]
async fn replies_are_not_requests() {
    let request = Command::Executed {
        pass: 0,
        seconds: 1.0,
    };

    let (reply, served) = roundtrip(worker(1, SharedGraph::default()), request).await;

    assert!(matches!(
        reply,
        Command::Failed {
            kind: FailureKind::Execution,
            ..
        }
    ));
    assert!(matches!(
        served,
        Err(WorkerErr::UnexpectedMessage { got: "executed" })
    ));
}

fn validating_worker(graph: SharedGraph) -> Worker {
    worker(1, graph).validating_only()
}

#[tokio::test]
async fn validating_worker_refuses_to_plan_a_real_run() {
    let mut spec = spec();
    spec.dry_run = false;
    let request = Command::Discover {
        run: RunContext::with_id("test"),
        spec,
    };

    let (reply, served) = roundtrip(validating_worker(SharedGraph::default()), request).await;

    let Command::Failed { kind, detail } = reply else {
        panic!("expected a failure, got {}", reply.kind());
    };
    assert_eq!(kind, FailureKind::Configuration);
    assert!(detail.contains("LAMINO_ENGINE"), "{detail}");
    assert!(matches!(served, Err(WorkerErr::Configuration(_))));
}

#[tokio::test]
async fn validating_worker_refuses_to_execute_a_real_run() {
    let graph = SharedGraph::default();
    let Command::Execute { run, mut job } = execute(0, vec![Region::new(-2.0, 2.0, 1.0)], 1)
    else {
        unreachable!();
    };
    job.spec.dry_run = false;

    let (reply, served) =
        roundtrip(validating_worker(graph.clone()), Command::Execute { run, job }).await;

    assert!(matches!(
        reply,
        Command::Failed {
            kind: FailureKind::Execution,
            ..
        }
    ));
    assert!(matches!(served, Err(WorkerErr::Engine(_))));
    assert_eq!(graph.0.lock().unwrap().runs(), 0);
}

#[tokio::test]
async fn validating_worker_still_serves_dry_runs() {
    let graph = SharedGraph::default();
    let request = execute(0, vec![Region::new(-2.0, 2.0, 1.0)], 1);

    let (reply, served) = roundtrip(validating_worker(graph.clone()), request).await;
    served.unwrap();

    assert!(matches!(reply, Command::Executed { pass: 0, .. }));
    assert_eq!(graph.0.lock().unwrap().runs(), 1);
}
