//! Builtin opcode table.
//!
//! Layouts follow the BGAPI Bluetooth mesh host API. Names are
//! `<class>_<message>`; a command and its response share a name.

use bgmesh_frame::{MessageKind, Opcode};

use crate::descriptor::{
    Entry, Field, FieldType, PayloadDescriptor, Role, Tail, HANDLE_FIELD, RESULT_FIELD,
};

pub const CLASS_SYSTEM: u8 = 0x01;
pub const CLASS_MESH_NODE: u8 = 0x14;
pub const CLASS_MESH_VENDOR_MODEL: u8 = 0x19;
pub const CLASS_MESH_LPN: u8 = 0x23;
pub const CLASS_MESH_CONFIG_CLIENT: u8 = 0x27;

fn u8f(name: &str) -> Field {
    Field::new(name, FieldType::U8)
}

fn i8f(name: &str) -> Field {
    Field::new(name, FieldType::I8)
}

fn u16f(name: &str) -> Field {
    Field::new(name, FieldType::U16)
}

fn u32f(name: &str) -> Field {
    Field::new(name, FieldType::U32)
}

fn result() -> Field {
    u16f(RESULT_FIELD)
}

fn handle() -> Field {
    u32f(HANDLE_FIELD)
}

fn layout(fields: Vec<Field>, tail: Option<Tail>) -> PayloadDescriptor {
    PayloadDescriptor { fields, tail }
}

/// Leading parameters of every configuration client request.
fn target() -> Vec<Field> {
    vec![u16f("enc_netkey_index"), u16f("server_address")]
}

fn target_with(extra: &[&str]) -> Vec<Field> {
    let mut fields = target();
    fields.extend(extra.iter().map(|name| u16f(name)));
    fields
}

/// Target plus the model being configured.
fn model() -> Vec<Field> {
    let mut fields = target();
    fields.push(u8f("elem_index"));
    fields.push(u16f("vendor_id"));
    fields.push(u16f("model_id"));
    fields
}

fn model_with(name: &str) -> Vec<Field> {
    let mut fields = model();
    fields.push(u16f(name));
    fields
}

/// Accumulates entries for one class at a time.
struct TableBuilder {
    entries: Vec<Entry>,
    class: u8,
    prefix: &'static str,
    family: &'static str,
}

impl TableBuilder {
    fn class(&mut self, class: u8, prefix: &'static str) -> &mut Self {
        self.class = class;
        self.prefix = prefix;
        self.family = prefix;
        self
    }

    fn family(&mut self, family: &'static str) -> &mut Self {
        self.family = family;
        self
    }

    fn push(&mut self, kind: MessageKind, message: u8, name: &str, desc: PayloadDescriptor, role: Role) {
        let opcode = match kind {
            MessageKind::Event => Opcode::event(self.class, message),
            _ => Opcode::command(self.class, message),
        };
        self.entries.push(Entry {
            kind,
            opcode,
            name: format!("{}_{name}", self.prefix),
            family: self.family.to_string(),
            descriptor: desc,
            role,
        });
    }

    /// Command plus its response.
    fn cmd(
        &mut self,
        message: u8,
        name: &str,
        params: PayloadDescriptor,
        returns: Vec<Field>,
    ) -> &mut Self {
        self.push(MessageKind::Command, message, name, params, Role::Plain);
        self.push(MessageKind::Response, message, name, layout(returns, None), Role::Plain);
        self
    }

    /// Command whose response carries a correlation handle.
    fn request(&mut self, message: u8, name: &str, params: Vec<Field>) -> &mut Self {
        self.push(MessageKind::Command, message, name, layout(params, None), Role::Request);
        self.push(
            MessageKind::Response,
            message,
            name,
            layout(vec![result(), handle()], None),
            Role::Plain,
        );
        self
    }

    fn evt(&mut self, message: u8, name: &str, desc: PayloadDescriptor, role: Role) -> &mut Self {
        self.push(MessageKind::Event, message, name, desc, role);
        self
    }

    /// Status event: `result`, `handle`, then message-specific fields.
    fn status(&mut self, message: u8, name: &str, extra: Vec<Field>) -> &mut Self {
        let mut fields = vec![result(), handle()];
        fields.extend(extra);
        self.evt(message, name, layout(fields, None), Role::Status)
    }

    /// List chunk plus terminator for one family.
    fn list(&mut self, message: u8, name: &str, before: Vec<Field>, tail: Tail) -> &mut Self {
        let mut fields = vec![handle()];
        fields.extend(before);
        self.evt(message, name, layout(fields, Some(tail)), Role::ListItem);
        self.evt(
            message + 1,
            &format!("{name}_end"),
            layout(vec![result(), handle()], None),
            Role::ListEnd,
        )
    }
}

/// All builtin entries, in table order.
pub fn builtin_entries() -> Vec<Entry> {
    let mut t = TableBuilder {
        entries: Vec::new(),
        class: 0,
        prefix: "",
        family: "",
    };

    t.class(CLASS_SYSTEM, "system")
        .cmd(0x00, "hello", layout(vec![], None), vec![result()])
        .cmd(0x01, "reset", layout(vec![u8f("dfu")], None), vec![])
        .evt(
            0x00,
            "boot",
            layout(
                vec![
                    u16f("major"),
                    u16f("minor"),
                    u16f("patch"),
                    u16f("build"),
                    u32f("bootloader"),
                    u16f("hw"),
                    u32f("hash"),
                ],
                None,
            ),
            Role::Plain,
        )
        .evt(
            0x06,
            "error",
            layout(vec![result()], Some(Tail::bytes("data"))),
            Role::Plain,
        );

    t.class(CLASS_MESH_NODE, "mesh_node")
        .cmd(0x00, "init", layout(vec![], None), vec![result()])
        .evt(
            0x00,
            "initialized",
            layout(vec![u8f("provisioned"), u16f("address"), u32f("ivi")], None),
            Role::Plain,
        )
        .evt(
            0x02,
            "provisioned",
            layout(vec![u32f("iv_index"), u16f("address")], None),
            Role::Plain,
        )
        .evt(
            0x0b,
            "heartbeat",
            layout(vec![u16f("src_addr"), u16f("dst_addr"), u8f("hops")], None),
            Role::Plain,
        );

    t.class(CLASS_MESH_LPN, "mesh_lpn")
        .cmd(0x00, "init", layout(vec![], None), vec![result()])
        .evt(
            0x01,
            "friendship_established",
            layout(vec![u16f("friend_address")], None),
            Role::Plain,
        )
        .evt(
            0x02,
            "friendship_failed",
            layout(vec![result()], None),
            Role::Plain,
        )
        .evt(
            0x03,
            "friendship_terminated",
            layout(vec![u16f("reason")], None),
            Role::Plain,
        );

    t.class(CLASS_MESH_CONFIG_CLIENT, "mesh_config_client")
        .cmd(0x00, "cancel_request", layout(vec![handle()], None), vec![result()])
        .cmd(
            0x01,
            "get_request_status",
            layout(vec![handle()], None),
            vec![
                result(),
                u16f("server_address"),
                u16f("opcode"),
                u32f("remaining_ms"),
                u8f("friend_acked"),
            ],
        )
        .cmd(
            0x02,
            "get_default_timeout",
            layout(vec![], None),
            vec![result(), u32f("timeout_ms"), u32f("lpn_timeout_ms")],
        )
        .cmd(
            0x03,
            "set_default_timeout",
            layout(vec![u32f("timeout_ms"), u32f("lpn_timeout_ms")], None),
            vec![result()],
        )
        .evt(
            0x00,
            "request_modified",
            layout(vec![handle()], None),
            Role::Modified,
        );

    t.family("netkey")
        .request(0x04, "add_netkey", target_with(&["netkey_index"]))
        .request(0x05, "remove_netkey", target_with(&["netkey_index"]))
        .request(0x06, "list_netkeys", target())
        .status(0x01, "netkey_status", vec![])
        .list(0x02, "netkey_list", vec![], Tail::elements("netkey_indices", 2));

    t.family("appkey")
        .request(0x07, "add_appkey", target_with(&["appkey_index", "netkey_index"]))
        .request(0x08, "remove_appkey", target_with(&["appkey_index", "netkey_index"]))
        .request(0x09, "list_appkeys", target_with(&["netkey_index"]))
        .status(0x04, "appkey_status", vec![])
        .list(0x05, "appkey_list", vec![], Tail::elements("appkey_indices", 2));

    t.family("bindings")
        .request(0x0a, "bind_model", model_with("appkey_index"))
        .request(0x0b, "unbind_model", model_with("appkey_index"))
        .request(0x0c, "list_bindings", model())
        .status(0x07, "binding_status", vec![])
        .list(0x08, "bindings_list", vec![], Tail::elements("appkey_indices", 2));

    t.family("subscriptions")
        .request(0x0d, "add_model_sub", model_with("sub_address"))
        .request(0x0e, "remove_model_sub", model_with("sub_address"))
        .request(0x0f, "list_subs", model())
        .status(0x0a, "model_sub_status", vec![])
        .list(0x0b, "subs_list", vec![], Tail::elements("addresses", 2));

    let mut dcd = target();
    dcd.push(u8f("page"));
    t.family("dcd")
        .request(0x10, "get_dcd", dcd)
        .list(0x0d, "dcd_data", vec![u8f("page")], Tail::bytes("data"));

    let vendor_keys = || {
        vec![
            u16f("elem_index"),
            u16f("vendor_id"),
            u16f("model_id"),
            u16f("destination_address"),
            i8f("va_index"),
            u16f("appkey_index"),
            u8f("nonrelayed"),
            u8f("opcode"),
            u8f("final"),
        ]
    };
    let mut receive = vendor_keys();
    receive.insert(3, u16f("source_address"));

    t.class(CLASS_MESH_VENDOR_MODEL, "mesh_vendor_model")
        .cmd(
            0x00,
            "send",
            layout(vendor_keys(), Some(Tail::bytes("payload"))),
            vec![result()],
        )
        .evt(
            0x00,
            "receive",
            layout(receive, Some(Tail::bytes("payload"))),
            Role::Chunk {
                final_field: "final".to_string(),
                slot_fields: vec![
                    "elem_index".to_string(),
                    "vendor_id".to_string(),
                    "model_id".to_string(),
                ],
                message_fields: vec![
                    "source_address".to_string(),
                    "destination_address".to_string(),
                    "opcode".to_string(),
                ],
            },
        );

    t.entries
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn every_builtin_entry_is_valid() {
        for entry in builtin_entries() {
            entry.validate().unwrap();
        }
    }

    #[test]
    fn identifiers_and_names_are_unique_per_kind() {
        let entries = builtin_entries();
        let mut ids = HashSet::new();
        let mut names = HashSet::new();
        for entry in &entries {
            assert!(ids.insert((entry.kind, entry.opcode)), "{}", entry.name);
            assert!(names.insert((entry.kind, entry.name.clone())), "{}", entry.name);
        }
    }

    #[test]
    fn requests_have_handle_responses() {
        let entries = builtin_entries();
        for request in entries.iter().filter(|e| e.role == Role::Request) {
            let response = entries
                .iter()
                .find(|e| e.kind == MessageKind::Response && e.opcode == request.opcode)
                .unwrap();
            assert!(response.descriptor.field(HANDLE_FIELD).is_some());
            assert_eq!(response.name, request.name);
            assert_eq!(response.family, request.family);
        }
    }

    #[test]
    fn list_terminators_follow_their_items() {
        let entries = builtin_entries();
        let item = entries
            .iter()
            .find(|e| e.name == "mesh_config_client_netkey_list")
            .unwrap();
        let end = entries
            .iter()
            .find(|e| e.name == "mesh_config_client_netkey_list_end")
            .unwrap();
        assert_eq!(item.opcode, Opcode::event(CLASS_MESH_CONFIG_CLIENT, 0x02));
        assert_eq!(end.opcode, Opcode::event(CLASS_MESH_CONFIG_CLIENT, 0x03));
        assert_eq!(item.family, end.family);
    }
}
