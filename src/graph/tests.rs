//! Assembly and verification tests.

use super::*;
use crate::demo;
use crate::device::DeviceKind;
use crate::fifo::Port;
use crate::fifo::PortHandle;
use crate::program::{Iterations, Operand, ProgramBuilder, Step};
use crate::types::{ElementType, ScalarType};

fn npu() -> DeviceConfig {
    DeviceConfig::for_kind(DeviceKind::Npu1Col1)
}

fn codes(diags: &[Diagnostic]) -> Vec<&'static str> {
    diags.iter().map(|d| d.code).collect()
}

fn error_codes(diags: &[Diagnostic]) -> Vec<&'static str> {
    diags.iter().filter(|d| d.is_error()).map(|d| d.code).collect()
}

fn join_decls() -> GraphDecls {
    demo::join_l2(npu(), CompileOptions::default())
        .unwrap()
        .to_decls()
}

fn tile(col: u8, row: u8, role: TileRole) -> TileDecl {
    TileDecl {
        coord: TileCoord::new(col, row),
        role,
    }
}

fn channel(name: &str, producer: (u8, u8), consumer: (u8, u8), depth: u32, len: usize) -> ChannelDecl {
    ChannelDecl {
        name: name.to_string(),
        producer: TileCoord::new(producer.0, producer.1),
        consumers: vec![TileCoord::new(consumer.0, consumer.1)],
        depth,
        element: ElementType::array(ScalarType::I32, len),
    }
}

fn producer_program(row: u8, channel: &str, len: u32, iterations: u32) -> ProgramDecl {
    let port = PortHandle::new(channel, Port::Produce);
    ProgramBuilder::new()
        .acquire(&port, 1)
        .fill(&port, 0, len, Operand::Const(1))
        .release(&port, 1)
        .build_at(TileCoord::new(0, row), Iterations::Count(iterations))
}

fn consumer_program(row: u8, channel: &str, iterations: u32) -> ProgramDecl {
    let port = PortHandle::new(channel, Port::Consume);
    ProgramBuilder::new()
        .acquire(&port, 1)
        .read(&port, 0, 0)
        .release(&port, 1)
        .build_at(TileCoord::new(0, row), Iterations::Count(iterations))
}

fn check(decls: &GraphDecls) -> Result<VerifiedGraph, Vec<Diagnostic>> {
    let graph = assemble(decls, &npu(), &CompileOptions::default())?;
    verify(graph)
}

// --- Assembly ---

#[test]
fn test_assemble_reports_every_error() {
    let decls = GraphDecls {
        tiles: vec![
            tile(0, 1, TileRole::Memory),
            tile(0, 2, TileRole::Compute),
            tile(0, 2, TileRole::Compute),
            tile(0, 9, TileRole::Compute),
        ],
        channels: vec![
            channel("a", (0, 2), (0, 3), 2, 8),
            channel("b", (0, 2), (0, 1), 0, 8),
        ],
        links: vec![LinkDecl {
            sources: vec!["missing".to_string()],
            sink: "b".to_string(),
        }],
        ..GraphDecls::default()
    };
    let diags = assemble(&decls, &npu(), &CompileOptions::default()).unwrap_err();
    assert_eq!(
        codes(&diags),
        vec![
            "duplicate-tile",
            "tile-outside-device",
            "tile-not-found",
            "invalid-depth",
            "unknown-channel",
        ]
    );
}

#[test]
fn test_diagnostic_span_points_at_declaration() {
    let decls = GraphDecls {
        tiles: vec![tile(0, 2, TileRole::Compute), tile(0, 2, TileRole::Compute)],
        ..GraphDecls::default()
    };
    let mut builder = DeviceBuilder::new(npu(), CompileOptions::default());
    for t in &decls.tiles {
        let _ = builder.declare_tile(t.coord, t.role);
    }
    let span = builder.diagnostics()[0].span;
    let listing = builder.listing().text().to_string();
    // the second line, not the first
    assert!(span.start > 0);
    assert_eq!(
        &listing[span.start as usize..span.end as usize],
        "compute tile(0, 2)"
    );
}

#[test]
fn test_listing_of_decls_matches_assembly() {
    let decls = join_decls();
    let graph = assemble(&decls, &npu(), &CompileOptions::default()).unwrap();
    let listing = Listing::of(&decls);
    assert_eq!(listing.text(), graph.listing().text());
    assert_eq!(listing.link("out"), graph.listing().link("out"));
    assert!(listing.text().starts_with("shim tile(0, 0)\nmemory tile(0, 1)\n"));
}

#[test]
fn test_duplicate_channel_with_different_depth() {
    let mut b = DeviceBuilder::new(npu(), CompileOptions::default());
    let mem = b.declare_tile(TileCoord::new(0, 1), TileRole::Memory).unwrap();
    let core = b.declare_tile(TileCoord::new(0, 2), TileRole::Compute).unwrap();
    let elem = ElementType::array(ScalarType::I32, 8);
    b.create_channel("of", core, mem, 2, elem.clone()).unwrap();
    let err = b.create_channel("of", core, mem, 4, elem).unwrap_err();
    assert_eq!(err.code(), "duplicate-channel-name");
    let diags = b.assemble().unwrap_err();
    assert_eq!(diags.len(), 1);
    assert!(diags[0].notes[0].contains("depth 2 of 8xi32"));
}

#[test]
fn test_identical_redeclaration_is_named() {
    let mut b = DeviceBuilder::new(npu(), CompileOptions::default());
    let mem = b.declare_tile(TileCoord::new(0, 1), TileRole::Memory).unwrap();
    let core = b.declare_tile(TileCoord::new(0, 2), TileRole::Compute).unwrap();
    let elem = ElementType::array(ScalarType::I32, 8);
    b.create_channel("of", core, mem, 2, elem.clone()).unwrap();
    b.create_channel("of", core, mem, 2, elem).unwrap_err();
    assert!(b.diagnostics()[0].notes[0].contains("identical"));
}

#[test]
fn test_duplicate_program() {
    let mut decls = join_decls();
    decls.programs.push(decls.programs[0].clone());
    let diags = check(&decls).unwrap_err();
    assert_eq!(codes(&diags), vec!["duplicate-program"]);
}

#[test]
fn test_protocol_error_at_definition() {
    let mut decls = join_decls();
    decls.programs[1].steps.insert(
        0,
        Step::Acquire {
            port: PortHandle::new("out1", Port::Produce),
            count: 3,
        },
    );
    let diags = check(&decls).unwrap_err();
    assert!(codes(&diags).contains(&"capacity-exceeded"));
    assert!(diags[0].message.contains("tile(0, 3)"));
}

#[test]
fn test_graph_file_round_trip() {
    let decls = join_decls();
    let text = decls.to_json();
    let back = GraphDecls::from_json(&text).unwrap();
    assert_eq!(back, decls);
    assert_eq!(back.device.as_deref(), Some("npu1_1col"));
    assert!(check(&back).is_ok());
}

#[test]
fn test_graph_file_parse_error() {
    let err = GraphDecls::from_json("{ \"tiles\": [ { \"coord\": 3 } ] }").unwrap_err();
    assert_eq!(err.code, "invalid-graph-file");
    assert!(err.notes[0].contains("line 1"));
}

// --- Verification ---

#[test]
fn test_resolved_graph_without_programs_passes() {
    let decls = GraphDecls {
        tiles: vec![tile(0, 1, TileRole::Memory), tile(0, 2, TileRole::Compute)],
        channels: vec![channel("of", (0, 2), (0, 1), 2, 8)],
        ..GraphDecls::default()
    };
    let verified = check(&decls).unwrap();
    // nothing drives either side
    assert_eq!(codes(verified.warnings()), vec!["liveness", "liveness"]);
}

#[test]
fn test_unused_tile_warning() {
    let mut decls = join_decls();
    decls.tiles.push(tile(0, 5, TileRole::Compute));
    let verified = check(&decls).unwrap();
    assert_eq!(codes(verified.warnings()), vec!["unused-tile"]);
}

#[test]
fn test_link_cycle() {
    let decls = GraphDecls {
        tiles: vec![tile(0, 1, TileRole::Memory), tile(0, 2, TileRole::Compute)],
        channels: vec![
            channel("a", (0, 1), (0, 2), 2, 8),
            channel("b", (0, 2), (0, 1), 2, 8),
        ],
        links: vec![
            LinkDecl {
                sources: vec!["a".to_string()],
                sink: "b".to_string(),
            },
            LinkDecl {
                sources: vec!["b".to_string()],
                sink: "a".to_string(),
            },
        ],
        ..GraphDecls::default()
    };
    let diags = check(&decls).unwrap_err();
    assert_eq!(error_codes(&diags), vec!["link-cycle"]);
    assert!(diags[0].notes[0].contains("a, b"));
}

#[test]
fn test_program_drives_port_linked_later() {
    let decls = GraphDecls {
        tiles: vec![
            tile(0, 1, TileRole::Memory),
            tile(0, 2, TileRole::Compute),
            tile(0, 3, TileRole::Compute),
        ],
        channels: vec![
            channel("a", (0, 2), (0, 3), 2, 8),
            channel("b", (0, 3), (0, 1), 2, 8),
        ],
        links: vec![LinkDecl {
            sources: vec!["a".to_string()],
            sink: "b".to_string(),
        }],
        programs: vec![producer_program(3, "b", 8, 4)],
        ..GraphDecls::default()
    };
    // links are replayed before programs, so the builder already sees it
    let diags = check(&decls).unwrap_err();
    assert_eq!(codes(&diags), vec!["port-direction"]);

    // a builder used call by call can define the program first
    let mut b = DeviceBuilder::new(npu(), CompileOptions::default());
    for t in &decls.tiles {
        b.declare_tile(t.coord, t.role).unwrap();
    }
    for c in &decls.channels {
        b.insert_channel(c.clone()).unwrap();
    }
    b.insert_program(decls.programs[0].clone()).unwrap();
    b.insert_link(decls.links[0].clone()).unwrap();
    let diags = verify(b.assemble().unwrap()).unwrap_err();
    assert!(error_codes(&diags).contains(&"port-direction"));
}

#[test]
fn test_memory_budget() {
    let decls = GraphDecls {
        tiles: vec![tile(0, 1, TileRole::Memory), tile(0, 2, TileRole::Compute)],
        // 32 x 1024 x 4 bytes is twice a compute tile's data memory
        channels: vec![channel("big", (0, 2), (0, 1), 32, 1024)],
        ..GraphDecls::default()
    };
    let diags = check(&decls).unwrap_err();
    assert_eq!(error_codes(&diags), vec!["resource-exhausted"]);
    assert!(diags[0].message.contains("data memory"));
    assert!(diags[0].message.contains("tile(0, 2)"));
}

#[test]
fn test_memory_budget_on_second_generation() {
    let device = DeviceConfig::for_kind(DeviceKind::Npu2Col1);
    let decls = GraphDecls {
        tiles: vec![tile(0, 1, TileRole::Memory), tile(0, 2, TileRole::Compute)],
        channels: vec![channel("big", (0, 2), (0, 1), 32, 1024)],
        ..GraphDecls::default()
    };
    let graph = assemble(&decls, &device, &CompileOptions::default()).unwrap();
    let diags = verify(graph).unwrap_err();
    assert_eq!(error_codes(&diags), vec!["resource-exhausted"]);
    assert!(diags[0].message.contains("data memory"));
}

#[test]
fn test_oversized_element_in_graph_file() {
    let text = r#"{
        "tiles": [
            { "coord": { "col": 0, "row": 1 }, "role": "memory" },
            { "coord": { "col": 0, "row": 2 }, "role": "compute" }
        ],
        "channels": [{
            "name": "wide",
            "producer": { "col": 0, "row": 2 },
            "consumers": [{ "col": 0, "row": 1 }],
            "depth": 2,
            "element": { "scalar": "i32", "shape": [4294967296, 4294967296] }
        }]
    }"#;
    let decls = GraphDecls::from_json(text).unwrap();
    let diags = crate::check(&decls, &npu(), &CompileOptions::default()).unwrap_err();
    assert_eq!(codes(&diags), vec!["element-too-large"]);
}

#[test]
fn test_dma_budget() {
    let mut tiles = vec![tile(0, 1, TileRole::Memory)];
    let mut channels = Vec::new();
    for row in 2..=4 {
        tiles.push(tile(0, row, TileRole::Compute));
        channels.push(channel(&format!("c{}", row), (0, 1), (0, row), 1, 4));
    }
    // five outgoing streams fit the memory tile; a compute tile takes two inputs
    for extra in ["x", "y"] {
        channels.push(channel(extra, (0, 1), (0, 2), 1, 4));
    }
    let decls = GraphDecls {
        tiles,
        channels,
        ..GraphDecls::default()
    };
    let diags = check(&decls).unwrap_err();
    assert_eq!(error_codes(&diags), vec!["resource-exhausted"]);
    assert!(diags[0].message.contains("incoming DMA"));
}

#[test]
fn test_unequal_join_sources() {
    let mut decls = join_decls();
    decls.programs[2].iterations = Iterations::Count(5);
    let diags = check(&decls).unwrap_err();
    assert_eq!(error_codes(&diags), vec!["liveness"]);
    assert!(diags[0].message.contains("unequal"));
    assert!(diags[0].message.contains("out2: 5"));
}

#[test]
fn test_consumer_outruns_producer() {
    let decls = GraphDecls {
        tiles: vec![tile(0, 2, TileRole::Compute), tile(0, 3, TileRole::Compute)],
        channels: vec![channel("of", (0, 2), (0, 3), 2, 8)],
        programs: vec![producer_program(2, "of", 8, 4), consumer_program(3, "of", 5)],
        ..GraphDecls::default()
    };
    let diags = check(&decls).unwrap_err();
    assert!(diags[0].message.contains("consumes 5 objects but only 4"));
}

#[test]
fn test_producer_overruns_consumer() {
    let decls = GraphDecls {
        tiles: vec![tile(0, 2, TileRole::Compute), tile(0, 3, TileRole::Compute)],
        channels: vec![channel("of", (0, 2), (0, 3), 2, 8)],
        programs: vec![producer_program(2, "of", 8, 6), consumer_program(3, "of", 3)],
        ..GraphDecls::default()
    };
    let diags = check(&decls).unwrap_err();
    assert!(diags[0].message.contains("blocks forever"));

    // leftovers that fit in the buffer are fine
    let mut ok = decls.clone();
    ok.programs[1] = consumer_program(3, "of", 4);
    assert!(check(&ok).is_ok());
}
