use std::sync::Arc;

use chisel_blocks::{register_core_blocks, register_custom_blocks, BlockCatalog};
use chisel_commands::{ArgValue, CommandRegistry, ConverterTable};
use chisel_format::{FormatRegistry, MetadataCodec, ObsidianWorldFormat, RawGzipFormat};
use chisel_registry::{Dependency, ModuleDescriptor, ModuleGraph, Registry};
use chisel_types::CpeExtension;
use chisel_world::{EmptyGenerator, FlatGenerator, MapGenerator};
use serde_json::Value;
use tracing::{debug, info};

use crate::commands::{self, CommandHandler};
use crate::config::ServerConfig;
use crate::hooks::{PlacementVerdict, ServerHooks};
use crate::worlds::{LOGOUT_LOCATIONS_KEY, METADATA_SOFTWARE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketDirection {
    Request,
    Response,
}

/// Registry entry for one wire packet. The receive loop resolves sizes
/// and player-loop eligibility through this table, so a module adding a
/// packet never touches the dispatcher.
#[derive(Debug, Clone)]
pub struct PacketDescriptor {
    pub id: u8,
    pub name: &'static str,
    pub direction: PacketDirection,
    pub size: usize,
    pub player_loop: bool,
}

/// Feature switches flipped by optional modules.
#[derive(Debug, Clone, Copy, Default)]
pub struct Features {
    pub logout_locations: bool,
}

/// Mutable registration surface handed to module init functions.
pub struct RegistriesBuilder {
    pub blocks: BlockCatalog,
    pub commands: CommandRegistry<CommandHandler>,
    pub packets: Registry<PacketDescriptor>,
    pub generators: Registry<Arc<dyn MapGenerator>>,
    pub formats: FormatRegistry,
    pub cpe_extensions: Vec<CpeExtension>,
    pub features: Features,
}

/// The frozen registries the running server reads from.
pub struct Registries {
    pub blocks: Arc<BlockCatalog>,
    pub commands: CommandRegistry<CommandHandler>,
    pub converters: ConverterTable,
    pub packets: Registry<PacketDescriptor>,
    pub generators: Registry<Arc<dyn MapGenerator>>,
    pub formats: FormatRegistry,
    pub cpe_extensions: Vec<CpeExtension>,
    pub features: Features,
}

impl Registries {
    /// Resolve an inbound packet id through the registry. The table is
    /// a couple dozen entries; a scan loses to socket IO by orders of
    /// magnitude.
    pub fn request_packet(&self, id: u8) -> Option<&PacketDescriptor> {
        self.packets
            .iter()
            .map(|(_, descriptor)| descriptor)
            .find(|d| d.direction == PacketDirection::Request && d.id == id)
    }
}

pub struct ModuleCtx<'a> {
    pub registries: &'a mut RegistriesBuilder,
    pub hooks: &'a mut ServerHooks,
}

type ModuleInit = fn(&mut ModuleCtx<'_>) -> anyhow::Result<()>;

/// A first-party module: identity, optional CPE extension, and the
/// registration routine run during the startup phase.
pub struct BuiltinModule {
    pub descriptor: ModuleDescriptor,
    pub cpe: Option<CpeExtension>,
    pub init: ModuleInit,
}

pub fn builtin_modules() -> Vec<BuiltinModule> {
    vec![
        BuiltinModule {
            descriptor: ModuleDescriptor::new("core", "1.0.0"),
            cpe: None,
            init: init_core,
        },
        BuiltinModule {
            descriptor: ModuleDescriptor::new("custom-blocks", "1.0.0")
                .depends_on(Dependency::any("core")),
            cpe: Some(CpeExtension::new("CustomBlocks", 1)),
            init: init_custom_blocks,
        },
        BuiltinModule {
            descriptor: ModuleDescriptor::new("bulk-block-update", "1.0.0")
                .depends_on(Dependency::any("core")),
            cpe: Some(CpeExtension::new("BulkBlockUpdate", 1)),
            init: init_bulk_block_update,
        },
        BuiltinModule {
            descriptor: ModuleDescriptor::new("full-cp437", "1.0.0")
                .depends_on(Dependency::any("core")),
            cpe: Some(CpeExtension::new("FullCP437", 1)),
            init: init_noop,
        },
        BuiltinModule {
            descriptor: ModuleDescriptor::new("emote-fix", "1.0.0")
                .depends_on(Dependency::any("core")),
            cpe: Some(CpeExtension::new("EmoteFix", 1)),
            init: init_noop,
        },
        BuiltinModule {
            descriptor: ModuleDescriptor::new("click-distance", "1.0.0")
                .depends_on(Dependency::any("core")),
            cpe: Some(CpeExtension::new("ClickDistance", 1)),
            init: init_click_distance,
        },
        BuiltinModule {
            descriptor: ModuleDescriptor::new("liquid-place", "1.0.0")
                .depends_on(Dependency::any("core")),
            cpe: None,
            init: init_liquid_place,
        },
        BuiltinModule {
            descriptor: ModuleDescriptor::new("logout-locations", "1.0.0")
                .depends_on(Dependency::any("core"))
                .soft_depends_on(Dependency::any("click-distance")),
            cpe: None,
            init: init_logout_locations,
        },
    ]
}

/// Run the full startup registration phase: build the module graph,
/// apply the blacklist, resolve order, and run every init.
pub fn initialize(config: &ServerConfig) -> anyhow::Result<(Registries, ServerHooks)> {
    let mut modules = builtin_modules();
    let mut graph = ModuleGraph::new();
    for module in &modules {
        graph.add(module.descriptor.clone())?;
    }
    for blacklisted in &config.module_blacklist {
        let dropped = graph.blacklist(blacklisted);
        modules.retain(|m| !dropped.contains(&m.descriptor.name));
    }
    let order: Vec<String> = graph
        .resolve_order()?
        .into_iter()
        .map(|d| d.name.clone())
        .collect();

    let mut builder = RegistriesBuilder {
        blocks: BlockCatalog::new(),
        commands: CommandRegistry::new(),
        packets: Registry::new("packet"),
        generators: Registry::new("map generator"),
        formats: FormatRegistry::new(),
        cpe_extensions: Vec::new(),
        features: Features::default(),
    };
    let mut hooks = ServerHooks::new();

    for name in &order {
        let module = modules
            .iter()
            .find(|m| &m.descriptor.name == name)
            .expect("resolved module exists");
        debug!(module = %name, "initializing module");
        let mut ctx = ModuleCtx {
            registries: &mut builder,
            hooks: &mut hooks,
        };
        (module.init)(&mut ctx)?;
        if let Some(cpe) = &module.cpe {
            builder.cpe_extensions.push(cpe.clone());
        }
    }
    info!(
        modules = order.len(),
        blocks = builder.blocks.len(),
        commands = builder.commands.len(),
        cpe = builder.cpe_extensions.len(),
        "registries initialized"
    );

    Ok((finish(builder), hooks))
}

fn finish(builder: RegistriesBuilder) -> Registries {
    let blocks = Arc::new(builder.blocks);

    // Converters that need live registry state are installed here, once
    // every module has had its say.
    let mut converters = ConverterTable::new();
    let catalog = blocks.clone();
    converters.insert(
        "block",
        Box::new(move |token: &str| {
            // Accept a numeric id or a block name.
            if let Ok(id) = token.parse::<u8>() {
                return catalog
                    .get(id)
                    .map(|b| ArgValue::Int(b.id as i32))
                    .map_err(|_| format!("Block '{token}' Not Found"));
            }
            catalog
                .get_by_name(token)
                .map(|b| ArgValue::Int(b.id as i32))
                .map_err(|_| format!("Block '{token}' Not Found"))
        }),
    );
    converters.insert(
        "username",
        Box::new(|token: &str| {
            chisel_types::Username::new(token)
                .map(|u| ArgValue::Str(u.as_str().to_string()))
                .map_err(|e| format!("Invalid Username: {e}"))
        }),
    );

    Registries {
        blocks,
        commands: builder.commands,
        converters,
        packets: builder.packets,
        generators: builder.generators,
        formats: builder.formats,
        cpe_extensions: builder.cpe_extensions,
        features: builder.features,
    }
}

fn init_noop(_ctx: &mut ModuleCtx<'_>) -> anyhow::Result<()> {
    Ok(())
}

fn init_core(ctx: &mut ModuleCtx<'_>) -> anyhow::Result<()> {
    register_core_blocks(&mut ctx.registries.blocks)?;

    ctx.registries
        .generators
        .register("flat", Arc::new(FlatGenerator) as Arc<dyn MapGenerator>, false)?;
    ctx.registries
        .generators
        .register("empty", Arc::new(EmptyGenerator) as Arc<dyn MapGenerator>, false)?;

    ctx.registries.formats.register(Arc::new(RawGzipFormat), false)?;
    ctx.registries
        .formats
        .register(Arc::new(ObsidianWorldFormat), false)?;

    for descriptor in core_packets() {
        ctx.registries
            .packets
            .register(descriptor.name, descriptor, false)?;
    }

    commands::register_core_commands(&mut ctx.registries.commands)?;
    Ok(())
}

fn core_packets() -> Vec<PacketDescriptor> {
    use PacketDirection::{Request, Response};
    let request = |id, name, size, player_loop| PacketDescriptor {
        id,
        name,
        direction: Request,
        size,
        player_loop,
    };
    let response = |id, name, size| PacketDescriptor {
        id,
        name,
        direction: Response,
        size,
        player_loop: false,
    };
    vec![
        request(0x00, "PlayerIdentification", 131, false),
        request(0x05, "UpdateBlock", 9, true),
        request(0x08, "MovementUpdate", 10, true),
        request(0x0D, "PlayerMessage", 66, true),
        request(0x10, "PlayerExtInfo", 67, false),
        request(0x11, "PlayerExtEntry", 69, false),
        response(0x00, "ServerIdentification", 131),
        response(0x01, "Ping", 1),
        response(0x02, "LevelInitialize", 1),
        response(0x03, "LevelDataChunk", 1028),
        response(0x04, "LevelFinalize", 7),
        response(0x06, "SetBlock", 8),
        response(0x07, "SpawnPlayer", 74),
        response(0x08, "PlayerPositionUpdate", 10),
        response(0x0C, "DespawnPlayer", 2),
        response(0x0D, "SendMessage", 66),
        response(0x0E, "DisconnectPlayer", 65),
        response(0x0F, "UpdateUserType", 2),
        response(0x10, "ServerExtInfo", 67),
        response(0x11, "ServerExtEntry", 69),
    ]
}

fn init_custom_blocks(ctx: &mut ModuleCtx<'_>) -> anyhow::Result<()> {
    register_custom_blocks(&mut ctx.registries.blocks)?;
    Ok(())
}

fn init_bulk_block_update(ctx: &mut ModuleCtx<'_>) -> anyhow::Result<()> {
    ctx.registries.packets.register(
        "BulkBlockUpdate",
        PacketDescriptor {
            id: 0x26,
            name: "BulkBlockUpdate",
            direction: PacketDirection::Response,
            size: 1282,
            player_loop: false,
        },
        false,
    )?;
    Ok(())
}

fn init_click_distance(ctx: &mut ModuleCtx<'_>) -> anyhow::Result<()> {
    ctx.registries.packets.register(
        "SetClickDistance",
        PacketDescriptor {
            id: 0x12,
            name: "SetClickDistance",
            direction: PacketDirection::Response,
            size: 3,
            player_loop: false,
        },
        false,
    )?;
    ctx.registries.formats.register_metadata_codec(
        "obsidian-world",
        METADATA_SOFTWARE,
        "clickDistance",
        MetadataCodec::validating(|value| {
            value
                .get("distance")
                .and_then(Value::as_i64)
                .map(|_| ())
                .ok_or_else(|| "missing integer 'distance'".to_string())
        }),
    );
    commands::register_click_distance_command(&mut ctx.registries.commands)?;
    Ok(())
}

/// Liquid restriction layered as a replace-hook over the core placement
/// check: liquids (and bedrock) are denied unless the config allows
/// them, with the usual op bypass; everything else defers to the
/// original check.
fn init_liquid_place(ctx: &mut ModuleCtx<'_>) -> anyhow::Result<()> {
    ctx.hooks.placement_check.set_replacement(
        |placement, sup| {
            if placement.is_liquid && !placement.allow_liquid_placement {
                if placement.is_op {
                    return PlacementVerdict::Warn(
                        "&4[WARNING] &fPlayers Cannot Place Liquids, But You Are an OP!".into(),
                    );
                }
                return PlacementVerdict::Deny("You Cannot Place Liquids".into());
            }
            sup.expect("installed with pass_super")(placement)
        },
        true,
    );
    Ok(())
}

fn init_logout_locations(ctx: &mut ModuleCtx<'_>) -> anyhow::Result<()> {
    ctx.registries.features.logout_locations = true;
    ctx.registries.formats.register_metadata_codec(
        "obsidian-world",
        METADATA_SOFTWARE,
        LOGOUT_LOCATIONS_KEY,
        MetadataCodec::validating(|value| {
            value
                .get("locations")
                .and_then(Value::as_object)
                .map(|_| ())
                .ok_or_else(|| "missing 'locations' object".to_string())
        }),
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initialize_registers_everything() {
        let config = ServerConfig::default();
        let (registries, _hooks) = initialize(&config).unwrap();
        // Base + CPE block sets.
        assert_eq!(registries.blocks.len(), 66);
        assert!(registries.generators.has("flat"));
        assert!(registries.formats.has("obsidian-world"));
        assert!(registries.commands.resolve("teleport").is_ok());
        assert!(registries
            .cpe_extensions
            .contains(&CpeExtension::new("BulkBlockUpdate", 1)));
        assert!(registries.features.logout_locations);
        // The dispatcher table resolves inbound ids.
        let update = registries.request_packet(0x05).unwrap();
        assert_eq!(update.size, 9);
        assert!(update.player_loop);
        assert!(registries.request_packet(0x42).is_none());
    }

    #[test]
    fn test_module_blacklist_disables_features() {
        let mut config = ServerConfig::default();
        config.module_blacklist.push("custom-blocks".into());
        config.module_blacklist.push("logout-locations".into());
        let (registries, _hooks) = initialize(&config).unwrap();
        assert_eq!(registries.blocks.len(), 50);
        assert!(!registries.features.logout_locations);
        assert!(!registries
            .cpe_extensions
            .contains(&CpeExtension::new("CustomBlocks", 1)));
    }

    #[test]
    fn test_liquid_place_hook_composes() {
        let config = ServerConfig::default();
        let (registries, hooks) = initialize(&config).unwrap();
        let ctx = crate::hooks::PlacementCtx {
            block_id: 8,
            is_op: false,
            is_liquid: true,
            is_disabled: false,
            allow_liquid_placement: false,
        };
        assert!(matches!(
            hooks.placement_check.call(&ctx),
            PlacementVerdict::Deny(_)
        ));
        let allowed = crate::hooks::PlacementCtx {
            allow_liquid_placement: true,
            ..ctx.clone()
        };
        assert_eq!(hooks.placement_check.call(&allowed), PlacementVerdict::Allow);

        // Bedrock is not a liquid: the hook must pass it through so the
        // per-block op-only policy drives the denial ("You Cannot Place
        // This Block"), and ops get no spurious liquid warning.
        let bedrock = registries.blocks.get(chisel_blocks::BEDROCK).unwrap();
        assert!(!bedrock.is_liquid_restricted());
        assert_eq!(bedrock.policy, chisel_blocks::PlacePolicy::OpOnly);
        let bedrock_ctx = crate::hooks::PlacementCtx {
            block_id: chisel_blocks::BEDROCK,
            is_op: false,
            is_liquid: bedrock.is_liquid_restricted(),
            is_disabled: false,
            allow_liquid_placement: false,
        };
        assert_eq!(
            hooks.placement_check.call(&bedrock_ctx),
            PlacementVerdict::Allow
        );
        let bedrock_op_ctx = crate::hooks::PlacementCtx {
            is_op: true,
            ..bedrock_ctx.clone()
        };
        assert_eq!(
            hooks.placement_check.call(&bedrock_op_ctx),
            PlacementVerdict::Allow
        );
    }
}
