//! Cinema 4D tool catalogue
//!
//! Every tool maps one-to-one onto a plugin command of the same name. The
//! plugin owns parameter validation, so input schemas describe the common
//! parameters but leave the object open.

use c4d_mcp_core::ToolResult;
use serde::Serialize;
use serde_json::{Value, json};
use std::sync::LazyLock;

/// Tool definition for MCP tools/list
#[derive(Debug, Clone, Serialize)]
pub struct ToolDef {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

/// Commands that block Cinema 4D while it renders
pub const RENDER_COMMANDS: &[&str] = &["render_frame", "render_preview", "snapshot_scene"];

static CATALOGUE: LazyLock<Vec<ToolDef>> = LazyLock::new(build_catalogue);

fn tool(name: &str, description: &str, properties: Value, required: &[&str]) -> ToolDef {
    let mut schema = json!({
        "type": "object",
        "properties": properties,
        "additionalProperties": true,
    });
    if !required.is_empty() {
        schema["required"] = json!(required);
    }
    ToolDef {
        name: name.into(),
        description: description.into(),
        input_schema: schema,
    }
}

fn build_catalogue() -> Vec<ToolDef> {
    let vector = json!({
        "type": "array",
        "items": { "type": "number" },
        "minItems": 3,
        "maxItems": 3
    });
    let color = json!({
        "type": "array",
        "items": { "type": "number", "minimum": 0, "maximum": 1 },
        "description": "RGB color, components 0..1"
    });

    vec![
        tool(
            "get_scene_info",
            "Get information about the active Cinema 4D document: name, frame range, FPS, object and material counts.",
            json!({}),
            &[],
        ),
        tool(
            "list_objects",
            "List every object in the scene hierarchy with its type and GUID.",
            json!({}),
            &[],
        ),
        tool(
            "add_primitive",
            "Add a primitive object. Example: {\"primitive_type\": \"sphere\", \"name\": \"Ball\", \"position\": [0, 100, 0]}",
            json!({
                "primitive_type": {
                    "type": "string",
                    "description": "cube, sphere, cone, cylinder, plane, pyramid, torus, disc, tube, platonic..."
                },
                "name": { "type": "string", "description": "Optional object name" },
                "position": vector,
                "size": vector
            }),
            &["primitive_type"],
        ),
        tool(
            "modify_object",
            "Modify an existing object's position, rotation, scale or name. Example: {\"object_name\": \"Cube\", \"properties\": {\"position\": [0, 50, 0]}}",
            json!({
                "object_name": { "type": "string", "description": "Name or GUID of the object" },
                "properties": {
                    "type": "object",
                    "description": "Properties to change: position, rotation, scale, name, color"
                }
            }),
            &["object_name", "properties"],
        ),
        tool(
            "group_objects",
            "Group objects under a new null object.",
            json!({
                "object_names": { "type": "array", "items": { "type": "string" } },
                "group_name": { "type": "string" }
            }),
            &["object_names"],
        ),
        tool(
            "create_material",
            "Create a material. Example: {\"name\": \"Red\", \"color\": [1, 0, 0], \"material_type\": \"standard\"}",
            json!({
                "name": { "type": "string" },
                "color": color,
                "material_type": {
                    "type": "string",
                    "description": "standard, redshift or octane, if the renderer is installed"
                },
                "properties": { "type": "object" }
            }),
            &["name"],
        ),
        tool(
            "apply_material",
            "Assign a material to an object.",
            json!({
                "material_name": { "type": "string" },
                "object_name": { "type": "string" }
            }),
            &["material_name", "object_name"],
        ),
        tool(
            "apply_shader",
            "Create a shader (noise, gradient, fresnel, layer...) and apply it to a material channel, optionally assigning the material to an object.",
            json!({
                "shader_type": { "type": "string" },
                "material_name": { "type": "string" },
                "object_name": { "type": "string" },
                "channel": { "type": "string", "description": "color, luminance, bump, ..." },
                "parameters": { "type": "object" }
            }),
            &["shader_type"],
        ),
        tool(
            "create_camera",
            "Create a camera and optionally make it the active camera.",
            json!({
                "name": { "type": "string" },
                "position": vector,
                "target_position": vector,
                "properties": {
                    "type": "object",
                    "description": "focal_length, aperture, film_offset_x, ..."
                }
            }),
            &[],
        ),
        tool(
            "animate_camera",
            "Animate a camera along a path of positions over a frame range.",
            json!({
                "camera_name": { "type": "string" },
                "path_type": { "type": "string", "description": "linear, spline, orbit" },
                "positions": { "type": "array", "items": vector },
                "frames": { "type": "array", "items": { "type": "integer" } },
                "create_camera": { "type": "boolean" }
            }),
            &[],
        ),
        tool(
            "create_light",
            "Create a light. Example: {\"light_type\": \"area\", \"intensity\": 120, \"color\": [1, 0.9, 0.8]}",
            json!({
                "light_type": { "type": "string", "description": "point, spot, area, infinite, ..." },
                "name": { "type": "string" },
                "position": vector,
                "color": color,
                "intensity": { "type": "number" }
            }),
            &[],
        ),
        tool(
            "set_keyframe",
            "Set a keyframe on an object property at a frame.",
            json!({
                "object_name": { "type": "string" },
                "property_name": {
                    "type": "string",
                    "description": "position, rotation, scale, or a component such as position.x"
                },
                "value": { "description": "Number or [x, y, z]" },
                "frame": { "type": "integer" }
            }),
            &["object_name", "property_name", "value", "frame"],
        ),
        tool(
            "render_frame",
            "Render the current frame to a file and report render statistics.",
            json!({
                "output_path": { "type": "string" },
                "width": { "type": "integer" },
                "height": { "type": "integer" },
                "frame": { "type": "integer" }
            }),
            &[],
        ),
        tool(
            "render_preview",
            "Render a quick preview and return it as a base64-encoded image.",
            json!({
                "width": { "type": "integer" },
                "height": { "type": "integer" },
                "frame": { "type": "integer" },
                "camera_name": { "type": "string" }
            }),
            &[],
        ),
        tool(
            "snapshot_scene",
            "Capture the current scene state with an optional viewport preview image.",
            json!({
                "file_path": { "type": "string" },
                "include_assets": { "type": "boolean" }
            }),
            &[],
        ),
        tool(
            "save_scene",
            "Save the active document, optionally under a new path.",
            json!({ "file_path": { "type": "string" } }),
            &[],
        ),
        tool(
            "load_scene",
            "Load a Cinema 4D document and make it active.",
            json!({ "file_path": { "type": "string" } }),
            &["file_path"],
        ),
        tool(
            "execute_python",
            "Run a Python script inside Cinema 4D and return its captured output.",
            json!({ "script": { "type": "string" } }),
            &["script"],
        ),
        tool(
            "create_mograph_cloner",
            "Create a MoGraph cloner (linear, radial, grid, object) and clone an existing object.",
            json!({
                "cloner_type": { "type": "string" },
                "name": { "type": "string" },
                "object_name": { "type": "string", "description": "Object to clone" },
                "count": { "type": "integer" },
                "properties": { "type": "object" }
            }),
            &[],
        ),
        tool(
            "add_effector",
            "Add a MoGraph effector and optionally link it to a cloner.",
            json!({
                "effector_type": { "type": "string", "description": "random, shader, plain, delay, ..." },
                "name": { "type": "string" },
                "cloner_name": { "type": "string" },
                "properties": { "type": "object" }
            }),
            &["effector_type"],
        ),
        tool(
            "apply_mograph_fields",
            "Create a MoGraph field and link it to an effector or deformer.",
            json!({
                "field_type": { "type": "string", "description": "spherical, box, linear, radial, noise, ..." },
                "target_name": { "type": "string" },
                "field_name": { "type": "string" },
                "parameters": { "type": "object" }
            }),
            &["field_type"],
        ),
        tool(
            "create_soft_body",
            "Add a soft body dynamics tag to an object.",
            json!({
                "object_name": { "type": "string" },
                "name": { "type": "string" },
                "stiffness": { "type": "number" },
                "mass": { "type": "number" }
            }),
            &["object_name"],
        ),
        tool(
            "apply_dynamics",
            "Add a rigid body, collider or ghost dynamics tag to an object.",
            json!({
                "object_name": { "type": "string" },
                "tag_type": { "type": "string", "description": "rigid_body, collider, ghost, ..." },
                "parameters": { "type": "object" }
            }),
            &["object_name"],
        ),
        tool(
            "create_abstract_shape",
            "Create an abstract shape (metaball, blob, torus knot, ...) from primitives and generators.",
            json!({
                "shape_type": { "type": "string" },
                "name": { "type": "string" },
                "position": vector
            }),
            &["shape_type"],
        ),
    ]
}

/// Get list of available tools
pub fn list_tools() -> &'static [ToolDef] {
    &CATALOGUE
}

/// Whether `name` is a catalogue tool
pub fn is_known(name: &str) -> bool {
    CATALOGUE.iter().any(|tool| tool.name == name)
}

pub fn is_render_command(name: &str) -> bool {
    RENDER_COMMANDS.contains(&name)
}

/// Wrap a Cinema 4D payload as an MCP `tools/call` result
pub fn call_result(result: &ToolResult) -> Value {
    let text = serde_json::to_string_pretty(&result.payload)
        .unwrap_or_else(|_| result.payload.to_string());

    let mut value = json!({
        "content": [{ "type": "text", "text": text }],
        "isError": false,
    });
    if result.payload.is_object() {
        value["structuredContent"] = result.payload.clone();
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_catalogue_names_are_unique() {
        let names: HashSet<&str> = list_tools().iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names.len(), list_tools().len());
        assert_eq!(names.len(), 24);
    }

    #[test]
    fn test_render_commands_are_tools() {
        for name in RENDER_COMMANDS {
            assert!(is_known(name), "{} missing from catalogue", name);
        }
        assert!(is_render_command("render_preview"));
        assert!(!is_render_command("add_primitive"));
        assert!(!is_known("format_disk"));
    }

    #[test]
    fn test_schemas_are_open_objects() {
        for tool in list_tools() {
            assert_eq!(tool.input_schema["type"], "object", "{}", tool.name);
            assert_eq!(tool.input_schema["additionalProperties"], true, "{}", tool.name);
        }
        let value = serde_json::to_value(&list_tools()[0]).unwrap();
        assert!(value.get("inputSchema").is_some());
    }

    #[test]
    fn test_call_result_wraps_payload() {
        let result = call_result(&ToolResult::new(json!({"object": {"name": "Sphere"}})));
        assert_eq!(result["isError"], false);
        assert_eq!(result["content"][0]["type"], "text");
        assert!(result["content"][0]["text"].as_str().unwrap().contains("Sphere"));
        assert_eq!(result["structuredContent"]["object"]["name"], "Sphere");

        let result = call_result(&ToolResult::new(json!("done")));
        assert!(result.get("structuredContent").is_none());
    }
}
