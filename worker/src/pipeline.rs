//! The reconstruction pipeline of a single pass.
//!
//! Every chunk of the pass gets its own branch pinned to one GPU:
//!
//! ```text
//! source -> broadcast -+-> pad -> fft -> filter -> ifft -> crop -> backproject -> slice -> write
//!                      +-> ...
//! ```

use std::time::Duration;

use comms::specs::{
    plan::PassSpec,
    recon::{ReconSpec, SweepParameter},
    region::Region,
    run::RunContext,
};
use log::{debug, info};

use crate::{
    Result, WorkerErr,
    engine::{Property, TaskGraph, TaskId},
    probe::GpuDescriptor,
};

/// Horizontal padding applied before filtering, the projections are cropped back afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Padding {
    pub width: usize,
    pub height: usize,
    /// Amount of pixels added to the width.
    pub padding: usize,
}

impl Padding {
    /// Pads `width` up to the power of two after `width + 32`.
    pub fn new(width: usize, height: usize) -> Self {
        let padding = (width + 32).next_power_of_two() - width;
        Self {
            width,
            height,
            padding,
        }
    }

    /// Horizontal offset of the original data inside the padded frame.
    pub fn offset(&self) -> usize {
        self.padding / 2
    }

    pub fn pad(&self) -> Pad {
        Pad {
            width: self.width + self.padding,
            height: self.height,
            x: self.offset(),
            y: 0,
        }
    }

    pub fn crop(&self) -> Crop {
        Crop {
            width: self.width,
            height: self.height,
            x: self.offset(),
            y: 0,
        }
    }
}

/// Edge-clamped padding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pad {
    pub width: usize,
    pub height: usize,
    pub x: usize,
    pub y: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Crop {
    pub width: usize,
    pub height: usize,
    pub x: usize,
    pub y: usize,
}

/// Ramp filter in frequency space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Filter {
    pub scale: f64,
}

impl Filter {
    /// The filter compensating the tilt of the rotation axis.
    pub fn for_lamino_angle(lamino_angle_deg: f64) -> Self {
        Self {
            scale: lamino_angle_deg.to_radians().sin(),
        }
    }
}

/// Backprojector configuration of one branch. Every angle is in radians.
#[derive(Debug, Clone, PartialEq)]
pub struct Backproject {
    pub num_projections: usize,
    pub overall_angle: f64,
    pub lamino_angle: f64,
    pub roll_angle: f64,
    pub x_region: Region,
    pub y_region: Region,
    pub z: f64,
    pub center: f64,
    pub parameter: SweepParameter,
    /// The chunk of the parameter region this branch reconstructs.
    pub region: Region,
}

impl Backproject {
    pub fn for_chunk(spec: &ReconSpec, x_region: Region, y_region: Region, chunk: Region) -> Self {
        let region = if spec.z_parameter.is_angular() {
            chunk.to_radians()
        } else {
            chunk
        };

        Self {
            num_projections: spec.number,
            overall_angle: spec.overall_angle.to_radians(),
            lamino_angle: spec.lamino_angle.to_radians(),
            roll_angle: spec.roll_angle.to_radians(),
            x_region,
            y_region,
            z: spec.z,
            center: spec.axis,
            parameter: spec.z_parameter,
            region,
        }
    }
}

/// Image stack reader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Read {
    pub path: String,
    /// Amount of images to read, everything when `None`.
    pub number: Option<usize>,
    pub step: usize,
    pub y: usize,
    pub height: usize,
}

impl Read {
    fn projections(spec: &ReconSpec) -> Self {
        Self {
            path: spec.input.display().to_string(),
            number: Some(spec.number),
            step: spec.projection_step,
            y: spec.y,
            height: spec.height,
        }
    }

    fn references(spec: &ReconSpec, path: &std::path::Path) -> Self {
        Self {
            path: path.display().to_string(),
            number: None,
            step: 1,
            y: spec.y,
            height: spec.height,
        }
    }
}

/// Where the projections come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    /// Synthetic `width x height x number` data.
    Dummy {
        width: usize,
        height: usize,
        number: usize,
    },
    Read(Read),
    FlatField {
        projections: Read,
        darks: Read,
        flats: Read,
    },
}

impl Source {
    pub fn for_spec(spec: &ReconSpec) -> Self {
        if spec.dry_run {
            return Self::Dummy {
                width: spec.width,
                height: spec.height,
                number: spec.number,
            };
        }

        match spec.flat_field() {
            Some((darks, flats)) => Self::FlatField {
                projections: Read::projections(spec),
                darks: Read::references(spec, darks),
                flats: Read::references(spec, flats),
            },
            None => Self::Read(Read::projections(spec)),
        }
    }
}

/// Where the reconstructed slices go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sink {
    /// One TIFF per slice, `filename` holds the `%04i` slice counter.
    Write { filename: String },
    /// Downloads and discards the slices.
    Null,
}

impl Sink {
    pub fn for_branch(spec: &ReconSpec, branch: usize) -> Self {
        if spec.dry_run {
            Self::Null
        } else {
            Self::Write {
                filename: format!("{}-{branch:03}-%04i.tif", spec.output),
            }
        }
    }
}

/// The typed stages the reconstruction is assembled from.
pub trait Stages {
    fn read(&mut self, read: &Read) -> Result<TaskId>;
    fn dummy_data(&mut self, width: usize, height: usize, number: usize) -> Result<TaskId>;
    fn average(&mut self) -> Result<TaskId>;
    /// Inputs are the projections, the dark field and the flat field, in that order.
    fn flat_field_correct(&mut self) -> Result<TaskId>;
    /// Hands every input to all of its outputs.
    fn broadcast(&mut self) -> Result<TaskId>;
    fn pad(&mut self, pad: &Pad) -> Result<TaskId>;
    fn fft(&mut self) -> Result<TaskId>;
    fn filter(&mut self, filter: &Filter) -> Result<TaskId>;
    fn ifft(&mut self) -> Result<TaskId>;
    fn crop(&mut self, crop: &Crop) -> Result<TaskId>;
    fn backproject(&mut self, backproject: &Backproject) -> Result<TaskId>;
    fn slice(&mut self) -> Result<TaskId>;
    fn sink(&mut self, sink: &Sink) -> Result<TaskId>;

    fn pin(&mut self, task: TaskId, gpu: usize) -> Result<()>;
    fn connect(&mut self, from: TaskId, to: TaskId) -> Result<()>;
    fn connect_input(&mut self, from: TaskId, to: TaskId, port: usize) -> Result<()>;
    fn run(&mut self) -> Result<Duration>;
}

/// Implements the typed stages on top of a string keyed engine.
pub struct GraphAdapter<'g, G: TaskGraph + ?Sized> {
    graph: &'g mut G,
}

impl<'g, G: TaskGraph + ?Sized> GraphAdapter<'g, G> {
    pub fn new(graph: &'g mut G) -> Self {
        Self { graph }
    }

    fn task<const N: usize>(
        &mut self,
        plugin: &str,
        properties: [(&str, Property); N],
    ) -> Result<TaskId> {
        let task = self.graph.get_task(plugin)?;
        for (key, value) in properties {
            self.graph.set_property(task, key, value)?;
        }

        Ok(task)
    }
}

impl<G: TaskGraph + ?Sized> Stages for GraphAdapter<'_, G> {
    fn read(&mut self, read: &Read) -> Result<TaskId> {
        let task = self.task(
            "read",
            [
                ("path", read.path.as_str().into()),
                ("step", read.step.into()),
                ("y", read.y.into()),
                ("height", read.height.into()),
            ],
        )?;

        if let Some(number) = read.number {
            self.graph.set_property(task, "number", number.into())?;
        }

        Ok(task)
    }

    fn dummy_data(&mut self, width: usize, height: usize, number: usize) -> Result<TaskId> {
        self.task(
            "dummy-data",
            [
                ("width", width.into()),
                ("height", height.into()),
                ("number", number.into()),
            ],
        )
    }

    fn average(&mut self) -> Result<TaskId> {
        self.task("average", [])
    }

    fn flat_field_correct(&mut self) -> Result<TaskId> {
        self.task("flat-field-correct", [])
    }

    fn broadcast(&mut self) -> Result<TaskId> {
        self.task("broadcast", [])
    }

    fn pad(&mut self, pad: &Pad) -> Result<TaskId> {
        self.task(
            "pad",
            [
                ("width", pad.width.into()),
                ("height", pad.height.into()),
                ("x", pad.x.into()),
                ("y", pad.y.into()),
                ("addressing-mode", "clamp_to_edge".into()),
            ],
        )
    }

    fn fft(&mut self) -> Result<TaskId> {
        self.task("fft", [("dimensions", 1usize.into())])
    }

    fn filter(&mut self, filter: &Filter) -> Result<TaskId> {
        self.task("filter", [("scale", filter.scale.into())])
    }

    fn ifft(&mut self) -> Result<TaskId> {
        self.task("ifft", [("dimensions", 1usize.into())])
    }

    fn crop(&mut self, crop: &Crop) -> Result<TaskId> {
        self.task(
            "crop",
            [
                ("width", crop.width.into()),
                ("height", crop.height.into()),
                ("x", crop.x.into()),
                ("y", crop.y.into()),
            ],
        )
    }

    fn backproject(&mut self, bp: &Backproject) -> Result<TaskId> {
        self.task(
            "lamino-backproject",
            [
                ("num-projections", bp.num_projections.into()),
                ("overall-angle", bp.overall_angle.into()),
                ("lamino-angle", bp.lamino_angle.into()),
                ("roll-angle", bp.roll_angle.into()),
                ("x-region", bp.x_region.into()),
                ("y-region", bp.y_region.into()),
                ("z", bp.z.into()),
                ("center", bp.center.into()),
                ("parameter", bp.parameter.as_str().into()),
                ("region", bp.region.into()),
            ],
        )
    }

    fn slice(&mut self) -> Result<TaskId> {
        self.task("slice", [])
    }

    fn sink(&mut self, sink: &Sink) -> Result<TaskId> {
        match sink {
            Sink::Write { filename } => self.task("write", [("filename", filename.as_str().into())]),
            Sink::Null => self.task("null", [("force-download", true.into())]),
        }
    }

    fn pin(&mut self, task: TaskId, gpu: usize) -> Result<()> {
        self.graph.set_device(task, gpu)
    }

    fn connect(&mut self, from: TaskId, to: TaskId) -> Result<()> {
        self.graph.connect(from, to)
    }

    fn connect_input(&mut self, from: TaskId, to: TaskId, port: usize) -> Result<()> {
        self.graph.connect_input(from, to, port)
    }

    fn run(&mut self) -> Result<Duration> {
        self.graph.run()
    }
}

fn build_source<S: Stages + ?Sized>(stages: &mut S, source: &Source) -> Result<TaskId> {
    match source {
        Source::Dummy {
            width,
            height,
            number,
        } => stages.dummy_data(*width, *height, *number),
        Source::Read(read) => stages.read(read),
        Source::FlatField {
            projections,
            darks,
            flats,
        } => {
            let projections = stages.read(projections)?;
            let correct = stages.flat_field_correct()?;
            stages.connect_input(projections, correct, 0)?;

            for (port, references) in [(1, darks), (2, flats)] {
                let read = stages.read(references)?;
                let average = stages.average()?;
                stages.connect(read, average)?;
                stages.connect_input(average, correct, port)?;
            }

            Ok(correct)
        }
    }
}

/// Builds the chain of one branch, returns its first task.
fn build_branch<S: Stages + ?Sized>(
    stages: &mut S,
    job: &PassSpec,
    branch: usize,
    chunk: Region,
) -> Result<TaskId> {
    let spec = &job.spec;
    let padding = Padding::new(spec.width, spec.height);
    let backproject = Backproject::for_chunk(spec, job.x_region, job.y_region, chunk);
    let gpu = branch;

    let pad = stages.pad(&padding.pad())?;
    let fft = stages.fft()?;
    let filter = stages.filter(&Filter::for_lamino_angle(spec.lamino_angle))?;
    let ifft = stages.ifft()?;
    let crop = stages.crop(&padding.crop())?;
    let bp = stages.backproject(&backproject)?;
    let slice = stages.slice()?;
    let sink = stages.sink(&Sink::for_branch(spec, job.branch_index(branch)))?;

    for task in [pad, fft, filter, ifft, crop, bp] {
        stages.pin(task, gpu)?;
    }

    for pair in [pad, fft, filter, ifft, crop, bp, slice, sink].windows(2) {
        stages.connect(pair[0], pair[1])?;
    }

    Ok(pad)
}

/// Assembles the whole pass, one branch per chunk.
///
/// # Arguments
/// * `stages` - Where to build the pass.
/// * `job` - The pass and everything needed to reconstruct it.
/// * `num_gpus` - Amount of GPUs available to this process.
///
/// # Errors
/// `Assignment` if the pass holds more chunks than there are GPUs, `Engine` if the engine
/// rejects the graph.
pub fn build_pass<S: Stages + ?Sized>(stages: &mut S, job: &PassSpec, num_gpus: usize) -> Result<()> {
    let chunks = &job.pass.chunks;
    if chunks.is_empty() || chunks.len() > num_gpus {
        return Err(WorkerErr::Assignment {
            pass: job.pass.index,
            chunks: chunks.len(),
            gpus: num_gpus,
        });
    }

    let source = build_source(stages, &Source::for_spec(&job.spec))?;
    let broadcast = stages.broadcast()?;
    stages.connect(source, broadcast)?;

    for (branch, chunk) in chunks.iter().enumerate() {
        debug!(
            pass = job.pass.index,
            branch = branch,
            output = job.branch_index(branch);
            "building branch for {chunk} on GPU {branch}"
        );

        let head = build_branch(stages, job, branch, *chunk)?;
        stages.connect(broadcast, head)?;
    }

    Ok(())
}

/// Builds the pass on `graph` and runs it.
///
/// # Returns
/// The time the engine spent executing the pass.
pub fn execute_pass<G: TaskGraph + ?Sized>(
    graph: &mut G,
    job: &PassSpec,
    gpus: &[GpuDescriptor],
    run: &RunContext,
) -> Result<Duration> {
    if let Some((start, stop)) = job.pass.span() {
        info!(run = run.id(), pass = job.pass.index; "computing slices {start}..{stop}");
    }

    let mut stages = GraphAdapter::new(graph);
    build_pass(&mut stages, job, gpus.len())?;
    let duration = stages.run()?;

    info!(
        run = run.id(),
        pass = job.pass.index;
        "execution time: {:.3} s",
        duration.as_secs_f64()
    );

    Ok(duration)
}
