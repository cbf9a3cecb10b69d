use std::cell::{Cell, RefCell};

use archiver_core::{
    compile_selector, Document, DocumentMeta, DocumentType, DomError, NodeId, RuleEdit,
    StripSelector, TextDirection,
};
use engine_logging::{DebugLog, LogLevel};
use mlua::{Function, Lua, Scope, Table};

use super::program::HOOKS;
use super::sandbox::Sandbox;
use super::{ScriptError, ScriptProgram};
use crate::config::ScriptSettings;
use crate::context::stage;

/// What a script may see and touch during one run.
pub struct ScriptEnv<'a> {
    pub host: &'a str,
    pub url: &'a str,
    pub document: &'a mut Document,
    pub meta: &'a mut DocumentMeta,
    pub log: &'a mut DebugLog,
}

/// Runs one script: `set_config`, then `process_meta`, then `document_ready`.
pub struct ScriptRunner<'s> {
    settings: &'s ScriptSettings,
}

struct HostState<'d> {
    script: String,
    document: RefCell<&'d mut Document>,
    log: RefCell<&'d mut DebugLog>,
    handles: RefCell<Vec<NodeId>>,
    edits: RefCell<Vec<RuleEdit>>,
}

impl HostState<'_> {
    fn handle(&self, id: NodeId) -> i64 {
        let mut handles = self.handles.borrow_mut();
        let index = match handles.iter().position(|h| *h == id) {
            Some(index) => index,
            None => {
                handles.push(id);
                handles.len() - 1
            }
        };
        index as i64 + 1
    }

    fn handles(&self, ids: Vec<NodeId>) -> Vec<i64> {
        ids.into_iter().map(|id| self.handle(id)).collect()
    }

    fn node(&self, handle: i64) -> mlua::Result<NodeId> {
        usize::try_from(handle - 1)
            .ok()
            .and_then(|i| self.handles.borrow().get(i).copied())
            .ok_or_else(|| mlua::Error::RuntimeError(format!("invalid node handle {handle}")))
    }

    fn edit(&self, edit: RuleEdit) -> mlua::Result<()> {
        let css = match &edit {
            RuleEdit::AddBody(css)
            | RuleEdit::AddTitle(css)
            | RuleEdit::AddAuthor(css)
            | RuleEdit::AddDate(css) => Some(css.clone()),
            RuleEdit::AddStrip(sel) => Some(sel.to_css()),
            _ => None,
        };
        if let Some(css) = css {
            compile_selector(&css).map_err(dom_err)?;
        }
        self.edits.borrow_mut().push(edit);
        Ok(())
    }
}

fn dom_err(err: DomError) -> mlua::Error {
    mlua::Error::RuntimeError(err.to_string())
}

impl<'s> ScriptRunner<'s> {
    pub fn new(settings: &'s ScriptSettings) -> Self {
        Self { settings }
    }

    /// Returns the rule edits the script asked for. On error the document and
    /// metadata may be partially modified; callers restore their snapshot.
    pub fn run(
        &self,
        program: &ScriptProgram,
        env: ScriptEnv<'_>,
    ) -> Result<Vec<RuleEdit>, ScriptError> {
        let sandbox = Sandbox::new(self.settings).map_err(|err| ScriptError::Sandbox {
            name: program.name.clone(),
            message: err.to_string(),
        })?;
        let lua = sandbox.lua();
        let state = HostState {
            script: program.name.clone(),
            document: RefCell::new(env.document),
            log: RefCell::new(env.log),
            handles: RefCell::new(Vec::new()),
            edits: RefCell::new(Vec::new()),
        };
        let meta = env.meta;
        let current_hook = Cell::new("load");

        let result = lua.scope(|scope| {
            install_host(lua, env.host, env.url)?;
            install_log(lua, scope, &state)?;
            let rule = install_rule(lua, scope, &state)?;
            let dom = install_dom(lua, scope, &state)?;

            let exports: Table = lua
                .load(program.source.as_str())
                .set_name(program.name.as_str())
                .eval()?;

            for hook in HOOKS {
                let Some(func) = exports.get::<_, Option<Function>>(hook)? else {
                    continue;
                };
                current_hook.set(hook);
                match hook {
                    "set_config" => func.call::<_, ()>(rule.clone())?,
                    "process_meta" => {
                        let table = meta_table(lua, meta)?;
                        func.call::<_, ()>(table.clone())?;
                        read_meta(&table, meta)?;
                    }
                    _ => func.call::<_, ()>(dom.clone())?,
                }
            }
            Ok(())
        });

        match result {
            Ok(()) => Ok(state.edits.into_inner()),
            Err(err) => Err(sandbox.classify(&program.name, current_hook.get(), &err)),
        }
    }
}

fn install_host(lua: &Lua, domain: &str, url: &str) -> mlua::Result<()> {
    let host = lua.create_table()?;
    host.set("domain", domain)?;
    host.set("url", url)?;
    lua.globals().set("host", host)
}

fn install_log<'lua, 'scope>(
    lua: &'lua Lua,
    scope: &Scope<'lua, 'scope>,
    state: &'scope HostState<'_>,
) -> mlua::Result<()> {
    let log = lua.create_table()?;
    for (name, level) in [
        ("debug", LogLevel::Debug),
        ("info", LogLevel::Info),
        ("warn", LogLevel::Warn),
        ("error", LogLevel::Error),
    ] {
        let func = scope.create_function(move |_, message: String| {
            let line = format!("{}: {message}", state.script);
            state.log.borrow_mut().record(level, stage::SCRIPTS, line);
            Ok(())
        })?;
        log.set(name, func)?;
    }
    lua.globals().set("log", log)
}

fn install_rule<'lua, 'scope>(
    lua: &'lua Lua,
    scope: &Scope<'lua, 'scope>,
    state: &'scope HostState<'_>,
) -> mlua::Result<Table<'lua>> {
    let rule = lua.create_table()?;
    let selector_edits: [(&str, fn(String) -> RuleEdit); 7] = [
        ("add_body", RuleEdit::AddBody),
        ("add_title", RuleEdit::AddTitle),
        ("add_author", RuleEdit::AddAuthor),
        ("add_date", RuleEdit::AddDate),
        ("add_strip", |css| RuleEdit::AddStrip(StripSelector::Css(css))),
        ("add_strip_id_or_class", |needle| {
            RuleEdit::AddStrip(StripSelector::IdOrClass(needle))
        }),
        ("add_strip_image_src", |needle| {
            RuleEdit::AddStrip(StripSelector::ImageSrc(needle))
        }),
    ];
    for (name, make) in selector_edits {
        let func = scope.create_function(move |_, value: String| state.edit(make(value)))?;
        rule.set(name, func)?;
    }
    let flag_edits: [(&str, RuleEdit); 4] = [
        ("clear_body", RuleEdit::ClearBody),
        ("clear_strip", RuleEdit::ClearStrip),
        ("disable_readability", RuleEdit::SetReadability(false)),
        ("enable_readability", RuleEdit::SetReadability(true)),
    ];
    for (name, edit) in flag_edits {
        let func = scope.create_function(move |_, ()| state.edit(edit.clone()))?;
        rule.set(name, func)?;
    }
    lua.globals().set("rule", rule.clone())?;
    Ok(rule)
}

fn install_dom<'lua, 'scope>(
    lua: &'lua Lua,
    scope: &Scope<'lua, 'scope>,
    state: &'scope HostState<'_>,
) -> mlua::Result<Table<'lua>> {
    let dom = lua.create_table()?;

    dom.set(
        "select",
        scope.create_function(move |_, css: String| {
            let ids = state.document.borrow().select(&css).map_err(dom_err)?;
            Ok(state.handles(ids))
        })?,
    )?;
    dom.set(
        "select_in",
        scope.create_function(move |_, (handle, css): (i64, String)| {
            let scope_id = state.node(handle)?;
            let ids = state
                .document
                .borrow()
                .select_in(scope_id, &css)
                .map_err(dom_err)?;
            Ok(state.handles(ids))
        })?,
    )?;
    dom.set(
        "first",
        scope.create_function(move |_, css: String| {
            let id = state.document.borrow().first(&css).map_err(dom_err)?;
            Ok(id.map(|id| state.handle(id)))
        })?,
    )?;
    dom.set(
        "body",
        scope.create_function(move |_, ()| {
            let id = state.document.borrow().body();
            Ok(id.map(|id| state.handle(id)))
        })?,
    )?;
    dom.set(
        "tag",
        scope.create_function(move |_, handle: i64| {
            let id = state.node(handle)?;
            Ok(state.document.borrow().tag(id))
        })?,
    )?;
    dom.set(
        "attr",
        scope.create_function(move |_, (handle, name): (i64, String)| {
            let id = state.node(handle)?;
            Ok(state.document.borrow().attr(id, &name))
        })?,
    )?;
    dom.set(
        "set_attr",
        scope.create_function(move |_, (handle, name, value): (i64, String, String)| {
            let id = state.node(handle)?;
            state
                .document
                .borrow_mut()
                .set_attr(id, &name, &value)
                .map_err(dom_err)
        })?,
    )?;
    dom.set(
        "remove_attr",
        scope.create_function(move |_, (handle, name): (i64, String)| {
            let id = state.node(handle)?;
            state
                .document
                .borrow_mut()
                .remove_attr(id, &name)
                .map_err(dom_err)
        })?,
    )?;
    dom.set(
        "remove",
        scope.create_function(move |_, handle: i64| {
            let id = state.node(handle)?;
            state.document.borrow_mut().detach(id).map_err(dom_err)
        })?,
    )?;
    dom.set(
        "text",
        scope.create_function(move |_, handle: i64| {
            let id = state.node(handle)?;
            Ok(state.document.borrow().text(id))
        })?,
    )?;
    dom.set(
        "html",
        scope.create_function(move |_, handle: i64| {
            let id = state.node(handle)?;
            Ok(state.document.borrow().outer_html(id))
        })?,
    )?;
    dom.set(
        "inner_html",
        scope.create_function(move |_, handle: i64| {
            let id = state.node(handle)?;
            Ok(state.document.borrow().inner_html(id))
        })?,
    )?;
    dom.set(
        "create",
        scope.create_function(move |_, tag: String| {
            let id = state
                .document
                .borrow_mut()
                .create_element(&tag)
                .map_err(dom_err)?;
            Ok(state.handle(id))
        })?,
    )?;
    dom.set(
        "create_text",
        scope.create_function(move |_, text: String| {
            let id = state.document.borrow_mut().create_text(&text);
            Ok(state.handle(id))
        })?,
    )?;
    dom.set(
        "append",
        scope.create_function(move |_, (parent, child): (i64, i64)| {
            let (parent, child) = (state.node(parent)?, state.node(child)?);
            state
                .document
                .borrow_mut()
                .append(parent, child)
                .map_err(dom_err)
        })?,
    )?;
    dom.set(
        "insert_before",
        scope.create_function(move |_, (sibling, node): (i64, i64)| {
            let (sibling, node) = (state.node(sibling)?, state.node(node)?);
            state
                .document
                .borrow_mut()
                .insert_before(sibling, node)
                .map_err(dom_err)
        })?,
    )?;
    dom.set(
        "parent",
        scope.create_function(move |_, handle: i64| {
            let id = state.node(handle)?;
            let parent = state.document.borrow().parent(id);
            Ok(parent.map(|p| state.handle(p)))
        })?,
    )?;
    dom.set(
        "children",
        scope.create_function(move |_, handle: i64| {
            let id = state.node(handle)?;
            let children = state.document.borrow().children(id);
            Ok(state.handles(children))
        })?,
    )?;
    dom.set(
        "rename",
        scope.create_function(move |_, (handle, tag): (i64, String)| {
            let id = state.node(handle)?;
            state.document.borrow_mut().rename(id, &tag).map_err(dom_err)
        })?,
    )?;

    lua.globals().set("dom", dom.clone())?;
    Ok(dom)
}

fn doc_type_name(doc_type: DocumentType) -> &'static str {
    match doc_type {
        DocumentType::Article => "article",
        DocumentType::Photo => "photo",
        DocumentType::Video => "video",
    }
}

fn meta_table<'lua>(lua: &'lua Lua, meta: &DocumentMeta) -> mlua::Result<Table<'lua>> {
    let table = lua.create_table()?;
    table.set("title", meta.title.as_str())?;
    table.set("description", meta.description.as_deref())?;
    table.set("site_name", meta.site_name.as_deref())?;
    table.set("lang", meta.lang.as_deref())?;
    table.set(
        "direction",
        meta.direction.map(|d| match d {
            TextDirection::Ltr => "ltr",
            TextDirection::Rtl => "rtl",
        }),
    )?;
    table.set("doc_type", doc_type_name(meta.doc_type))?;
    table.set("authors", meta.authors.clone())?;
    table.set("published", meta.published.as_deref())?;
    Ok(table)
}

/// Copies the script's changes back. Unknown direction or type values keep
/// the previous value.
fn read_meta(table: &Table<'_>, meta: &mut DocumentMeta) -> mlua::Result<()> {
    if let Some(title) = table.get::<_, Option<String>>("title")? {
        let title = title.trim();
        if !title.is_empty() {
            meta.title = title.to_string();
        }
    }
    meta.description = non_empty(table.get("description")?);
    meta.site_name = non_empty(table.get("site_name")?);
    meta.lang = non_empty(table.get("lang")?);
    meta.published = non_empty(table.get("published")?);
    if let Some(direction) = table.get::<_, Option<String>>("direction")? {
        meta.direction = TextDirection::parse(&direction).or(meta.direction);
    } else {
        meta.direction = None;
    }
    if let Some(doc_type) = table
        .get::<_, Option<String>>("doc_type")?
        .and_then(|t| DocumentType::parse(&t))
    {
        meta.doc_type = doc_type;
    }
    if let Some(authors) = table.get::<_, Option<Vec<String>>>("authors")? {
        meta.authors = authors
            .into_iter()
            .map(|a| a.trim().to_string())
            .filter(|a| !a.is_empty())
            .collect();
    }
    Ok(())
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
