use super::*;
use crate::device::{DeviceConfig, DeviceKind};
use crate::fifo::ChannelHandle;
use crate::tile::TileRole;
use crate::types::{ElementType, ScalarType};

struct Fixture {
    tiles: TileRegistry,
    channels: ChannelManager,
    links: LinkTable,
    options: CompileOptions,
    core: TileHandle,
    of: ChannelHandle,
}

impl Fixture {
    fn new() -> Self {
        let device = DeviceConfig::for_kind(DeviceKind::Npu1Col1);
        let mut tiles = TileRegistry::new();
        let mem = tiles
            .declare_tile(&device, TileCoord::new(0, 1), TileRole::Memory)
            .unwrap();
        let core = tiles
            .declare_tile(&device, TileCoord::new(0, 2), TileRole::Compute)
            .unwrap();
        let mut channels = ChannelManager::new();
        let of = channels
            .create_channel(
                &tiles,
                &device,
                "of",
                core,
                mem,
                2,
                ElementType::array(ScalarType::I8, 8),
            )
            .unwrap();
        Self {
            tiles,
            channels,
            links: LinkTable::new(),
            options: CompileOptions::default(),
            core,
            of,
        }
    }

    fn check(&self, program: &ProgramDecl) -> Vec<MeshError> {
        check_program(
            program,
            &ProgramContext {
                tiles: &self.tiles,
                channels: &self.channels,
                links: &self.links,
                options: &self.options,
            },
        )
    }
}

fn codes(errors: &[MeshError]) -> Vec<&'static str> {
    errors.iter().map(MeshError::code).collect()
}

#[test]
fn test_balanced_program_is_clean() {
    let f = Fixture::new();
    let p = f.of.produce();
    let program = ProgramBuilder::new()
        .acquire(&p, 1)
        .fill(&p, 0, 8, Operand::Const(1))
        .release(&p, 1)
        .build(f.core, Iterations::Count(6));
    assert!(f.check(&program).is_empty());
    assert_eq!(program.steps.len(), 10);
    assert_eq!(program.released_totals(&f.options)[&p], 6);
}

#[test]
fn test_acquire_beyond_depth() {
    let f = Fixture::new();
    let p = f.of.produce();
    let program = ProgramBuilder::new()
        .acquire(&p, 3)
        .build(f.core, Iterations::Count(1));
    let errors = f.check(&program);
    assert_eq!(codes(&errors), vec!["capacity-exceeded"]);
    assert!(matches!(
        errors[0],
        MeshError::CapacityExceeded { requested: 3, held: 0, depth: 2, .. }
    ));
}

#[test]
fn test_huge_acquire_after_partial_hold() {
    let f = Fixture::new();
    let p = f.of.produce();
    let program = ProgramBuilder::new()
        .acquire(&p, 1)
        .acquire(&p, u32::MAX)
        .release(&p, 1)
        .build(f.core, Iterations::Count(1));
    let errors = f.check(&program);
    assert_eq!(codes(&errors), vec!["capacity-exceeded"]);
    assert!(matches!(
        errors[0],
        MeshError::CapacityExceeded { requested: u32::MAX, held: 1, depth: 2, .. }
    ));
}

#[test]
fn test_acquire_is_additive() {
    let f = Fixture::new();
    let p = f.of.produce();
    let program = ProgramBuilder::new()
        .acquire(&p, 2)
        .acquire(&p, 1)
        .release(&p, 2)
        .build(f.core, Iterations::Count(1));
    let errors = f.check(&program);
    assert_eq!(codes(&errors), vec!["capacity-exceeded"]);
}

#[test]
fn test_release_more_than_held() {
    let f = Fixture::new();
    let p = f.of.produce();
    let program = ProgramBuilder::new()
        .acquire(&p, 1)
        .release(&p, 2)
        .build(f.core, Iterations::Count(1));
    let errors = f.check(&program);
    assert!(matches!(
        errors[0],
        MeshError::ReleaseMismatch { requested: 2, held: 1, .. }
    ));
}

#[test]
fn test_unbalanced_iteration() {
    let f = Fixture::new();
    let p = f.of.produce();
    let program = ProgramBuilder::new()
        .acquire(&p, 1)
        .build(f.core, Iterations::Count(4));
    let errors = f.check(&program);
    assert!(matches!(
        errors[0],
        MeshError::UnreleasedAtIterationEnd { held: 1, .. }
    ));
}

#[test]
fn test_access_outside_held_range() {
    let f = Fixture::new();
    let p = f.of.produce();
    let program = ProgramBuilder::new()
        .write(&p, 0, 0, Operand::Const(1))
        .acquire(&p, 1)
        .write(&p, 1, 0, Operand::Const(1))
        .write(&p, 0, 8, Operand::Const(1))
        .write(&p, 0, 7, Operand::Const(1))
        .release(&p, 1)
        .build(f.core, Iterations::Count(1));
    let errors = f.check(&program);
    assert_eq!(
        codes(&errors),
        vec!["unacquired-access", "unacquired-access", "unacquired-access"]
    );
}

#[test]
fn test_value_must_fit_scalar() {
    let f = Fixture::new();
    let p = f.of.produce();
    let program = ProgramBuilder::new()
        .acquire(&p, 1)
        .write(&p, 0, 0, Operand::Const(200))
        .write(&p, 0, 1, Operand::Const(-128))
        .release(&p, 1)
        .build(f.core, Iterations::Count(1));
    let errors = f.check(&program);
    assert_eq!(codes(&errors), vec!["value-out-of-range"]);
}

#[test]
fn test_iteration_operand_bounded_by_count() {
    let f = Fixture::new();
    let p = f.of.produce();
    let body = ProgramBuilder::new()
        .acquire(&p, 1)
        .write(&p, 0, 0, Operand::Iteration)
        .release(&p, 1);
    // i8 holds 0..=127
    assert!(f.check(&body.clone().build(f.core, Iterations::Count(128))).is_empty());
    let errors = f.check(&body.build(f.core, Iterations::Count(129)));
    assert_eq!(codes(&errors), vec!["value-out-of-range"]);
}

#[test]
fn test_wrong_endpoint() {
    let f = Fixture::new();
    let c = f.of.consume();
    let program = ProgramBuilder::new()
        .acquire(&c, 1)
        .read(&c, 0, 0)
        .release(&c, 1)
        .build(f.core, Iterations::Count(1));
    let errors = f.check(&program);
    // one report per port, not per step
    assert_eq!(codes(&errors), vec!["port-direction"]);
}

#[test]
fn test_unknown_channel() {
    let f = Fixture::new();
    let p = PortHandle::new("missing", Port::Produce);
    let program = ProgramBuilder::new()
        .acquire(&p, 1)
        .release(&p, 1)
        .build(f.core, Iterations::Count(1));
    assert_eq!(codes(&f.check(&program)), vec!["unknown-channel"]);
}

#[test]
fn test_link_owned_port() {
    let device = DeviceConfig::for_kind(DeviceKind::Npu1Col1);
    let mut f = Fixture::new();
    let relay = f
        .tiles
        .declare_tile(&device, TileCoord::new(0, 3), TileRole::Compute)
        .unwrap();
    let mem = f.tiles.resolve(TileCoord::new(0, 1), "test").unwrap();
    let a = f
        .channels
        .create_channel(
            &f.tiles,
            &device,
            "a",
            f.core,
            relay,
            2,
            ElementType::array(ScalarType::I32, 4),
        )
        .unwrap();
    let b = f
        .channels
        .create_channel(
            &f.tiles,
            &device,
            "b",
            relay,
            mem,
            2,
            ElementType::array(ScalarType::I32, 4),
        )
        .unwrap();
    f.links.link(&f.channels, &[a.clone()], &b).unwrap();

    let produce_sink = ProgramBuilder::new()
        .acquire(&b.produce(), 1)
        .release(&b.produce(), 1)
        .acquire(&a.consume(), 1)
        .release(&a.consume(), 1)
        .build(relay, Iterations::Count(1));
    let errors = f.check(&produce_sink);
    assert_eq!(codes(&errors), vec!["port-direction", "port-direction"]);
    assert!(errors[0].to_string().contains("produced by its link"));
    assert!(errors[1].to_string().contains("consumed by its link"));
}

#[test]
fn test_program_on_memory_tile() {
    let f = Fixture::new();
    let mem = f.tiles.resolve(TileCoord::new(0, 1), "test").unwrap();
    let program = ProgramBuilder::new().build(mem, Iterations::Count(1));
    let errors = f.check(&program);
    assert!(matches!(
        errors.as_slice(),
        [MeshError::NoCore {
            role: TileRole::Memory,
            ..
        }]
    ));
}

#[test]
fn test_steady_state_lowers_to_bound() {
    let options = CompileOptions {
        steady_state_iterations: 10,
    };
    assert_eq!(Iterations::Steady.resolve(&options), 10);
    assert_eq!(Iterations::Count(3).resolve(&options), 3);
}

#[test]
fn test_step_json_shape() {
    let step = Step::Acquire {
        port: PortHandle::new("of", Port::Produce),
        count: 1,
    };
    let json = serde_json::to_value(&step).unwrap();
    assert_eq!(json["op"], "acquire");
    assert_eq!(json["port"]["port"], "produce");
    let back: Step = serde_json::from_value(json).unwrap();
    assert_eq!(back, step);
}
