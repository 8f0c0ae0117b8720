//! Introspection of remote objects through
//! `org.freedesktop.DBus.Introspectable`.


use xmlparser::{ElementEnd, Token};

use crate::connection::Connection;
use crate::error::{Error, ErrorKind, Result};
use crate::message::Message;
use crate::signature::Type;
use crate::value::Value;

/// The interface the standard `Introspect` call lives on.
pub const INTERFACE: &str = "org.freedesktop.DBus.Introspectable";

/// A node in the object tree, as described by introspection XML.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Node {
    /// The name of the node. Absent on the root node.
    pub name: Option<String>,
    /// Interfaces implemented by the object at this node.
    pub interfaces: Vec<Interface>,
    /// Child nodes.
    pub nodes: Vec<Node>,
}

impl Node {
    /// Look up an interface by name.
    pub fn interface(&self, name: &str) -> Option<&Interface> {
        self.interfaces.iter().find(|i| i.name == name)
    }
}

/// An interface on an introspected object.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Interface {
    pub name: String,
    pub methods: Vec<Method>,
    pub signals: Vec<Signal>,
    pub properties: Vec<Property>,
}

impl Interface {
    /// Look up a method by name.
    pub fn method(&self, name: &str) -> Option<&Method> {
        self.methods.iter().find(|m| m.name == name)
    }

    /// Look up a signal by name.
    pub fn signal(&self, name: &str) -> Option<&Signal> {
        self.signals.iter().find(|s| s.name == name)
    }

    /// Look up a property by name.
    pub fn property(&self, name: &str) -> Option<&Property> {
        self.properties.iter().find(|p| p.name == name)
    }
}

/// A method on an introspected interface.
#[derive(Debug, Clone, PartialEq)]
pub struct Method {
    pub name: String,
    pub args: Vec<Arg>,
}

/// A signal on an introspected interface.
#[derive(Debug, Clone, PartialEq)]
pub struct Signal {
    pub name: String,
    pub args: Vec<Arg>,
}

/// A property on an introspected interface.
#[derive(Debug, Clone, PartialEq)]
pub struct Property {
    pub name: String,
    /// The D-Bus type of the property.
    pub ty: Type,
    pub access: Access,
}

/// An argument to a method or signal.
#[derive(Debug, Clone, PartialEq)]
pub struct Arg {
    pub name: Option<String>,
    /// The D-Bus type of the argument.
    pub ty: Type,
    /// The direction, when declared. Methods default to `in` arguments and
    /// signals to `out`.
    pub direction: Option<Direction>,
}

/// The direction of a method or signal argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
}

/// How a property may be accessed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
    ReadWrite,
}

/// Issue the standard `Introspect` call against the destination's object at
/// the given path and fold the returned XML.
///
/// # Examples
///
/// ```no_run
/// use minibus::{Connection, introspect};
///
/// # #[tokio::main(flavor = "current_thread")] async fn main() -> minibus::Result<()> {
/// let c = Connection::session_bus().await?;
/// let node = introspect::introspect(&c, "org.freedesktop.DBus", "/org/freedesktop/DBus").await?;
///
/// for interface in &node.interfaces {
///     println!("{}", interface.name);
/// }
/// # Ok(()) }
/// ```
pub async fn introspect(connection: &Connection, destination: &str, path: &str) -> Result<Node> {
    let m = Message::method_call(path, "Introspect")
        .with_destination(destination)
        .with_interface(INTERFACE);

    let reply = connection.call(m).await?;

    let Some(xml) = reply.body().first().and_then(Value::as_str) else {
        return Err(Error::new(ErrorKind::InvalidProtocol));
    };

    parse_introspection(xml)
}

/// Parse an introspection XML document into a [`Node`] tree.
///
/// A leading `<!DOCTYPE ...>` is stripped. Elements this crate does not model
/// (such as annotations) are skipped.
pub fn parse_introspection(xml: &str) -> Result<Node> {
    let xml = strip_doctype(xml);
    let tokenizer = xmlparser::Tokenizer::from(xml);

    let mut stack: Vec<State> = Vec::new();
    let mut skip = 0usize;
    let mut root = Node::default();

    for token in tokenizer {
        let token = token.map_err(|e| Error::new(ErrorKind::InvalidXml(e.to_string().into())))?;

        match token {
            Token::ElementStart { local, .. } => {
                if skip > 0 {
                    skip += 1;
                    continue;
                }

                match (stack.last(), local.as_str()) {
                    (None | Some(State::Node(..)), "node") => {
                        stack.push(State::Node(Node::default()));
                    }
                    (Some(State::Node(..)), "interface") => {
                        stack.push(State::Interface(Interface::default()));
                    }
                    (Some(State::Interface(..)), "method") => {
                        stack.push(State::Method(MethodBuilder::default()));
                    }
                    (Some(State::Interface(..)), "signal") => {
                        stack.push(State::Signal(MethodBuilder::default()));
                    }
                    (Some(State::Interface(..)), "property") => {
                        stack.push(State::Property(PropertyBuilder::default()));
                    }
                    (Some(State::Method(..) | State::Signal(..)), "arg") => {
                        stack.push(State::Argument(ArgBuilder::default()));
                    }
                    _ => {
                        skip = 1;
                    }
                }
            }
            Token::ElementEnd { end, .. } => {
                match end {
                    ElementEnd::Open => continue,
                    ElementEnd::Close(..) | ElementEnd::Empty => {}
                }

                if skip > 0 {
                    skip -= 1;
                    continue;
                }

                let Some(top) = stack.pop() else {
                    return Err(invalid("unbalanced element end"));
                };

                match (stack.last_mut(), top) {
                    (None, State::Node(node)) => {
                        root = node;
                    }
                    (Some(State::Node(parent)), State::Node(node)) => {
                        parent.nodes.push(node);
                    }
                    (Some(State::Node(node)), State::Interface(interface)) => {
                        if interface.name.is_empty() {
                            return Err(invalid("interface without a name"));
                        }

                        node.interfaces.push(interface);
                    }
                    (Some(State::Interface(interface)), State::Method(builder)) => {
                        interface.methods.push(builder.build_method()?);
                    }
                    (Some(State::Interface(interface)), State::Signal(builder)) => {
                        interface.signals.push(builder.build_signal()?);
                    }
                    (Some(State::Interface(interface)), State::Property(builder)) => {
                        interface.properties.push(builder.build()?);
                    }
                    (Some(State::Method(method) | State::Signal(method)), State::Argument(builder)) => {
                        method.args.push(builder.build()?);
                    }
                    _ => return Err(invalid("unexpected element nesting")),
                }
            }
            Token::Attribute { local, value, .. } => {
                if skip > 0 {
                    continue;
                }

                match (stack.last_mut(), local.as_str()) {
                    (Some(State::Node(node)), "name") => {
                        node.name = Some(value.as_str().into());
                    }
                    (Some(State::Interface(interface)), "name") => {
                        interface.name = value.as_str().into();
                    }
                    (Some(State::Method(builder) | State::Signal(builder)), "name") => {
                        builder.name = Some(value.as_str().into());
                    }
                    (Some(State::Property(builder)), "name") => {
                        builder.name = Some(value.as_str().into());
                    }
                    (Some(State::Property(builder)), "type") => {
                        builder.ty = Some(Type::parse(value.as_str())?);
                    }
                    (Some(State::Property(builder)), "access") => {
                        builder.access = Some(match value.as_str() {
                            "read" => Access::Read,
                            "write" => Access::Write,
                            "readwrite" => Access::ReadWrite,
                            other => {
                                return Err(invalid(&format!("unsupported access `{other}`")));
                            }
                        });
                    }
                    (Some(State::Argument(builder)), "name") => {
                        builder.name = Some(value.as_str().into());
                    }
                    (Some(State::Argument(builder)), "type") => {
                        builder.ty = Some(Type::parse(value.as_str())?);
                    }
                    (Some(State::Argument(builder)), "direction") => {
                        builder.direction = Some(match value.as_str() {
                            "in" => Direction::In,
                            "out" => Direction::Out,
                            other => {
                                return Err(invalid(&format!("unsupported direction `{other}`")));
                            }
                        });
                    }
                    _ => {}
                }
            }
            Token::Text { text } => {
                if skip == 0 && !text.as_str().trim().is_empty() {
                    return Err(invalid("unexpected text content"));
                }
            }
            _ => {}
        }
    }

    Ok(root)
}

fn invalid(what: &str) -> Error {
    Error::new(ErrorKind::InvalidXml(what.into()))
}

fn strip_doctype(xml: &str) -> &str {
    let mut rest = xml.trim_start();

    loop {
        if let Some(tail) = rest.strip_prefix("<?xml") {
            match tail.find("?>") {
                Some(at) => rest = tail[at + 2..].trim_start(),
                None => break,
            }
        } else if rest.starts_with("<!DOCTYPE") {
            match rest.find('>') {
                Some(at) => rest = rest[at + 1..].trim_start(),
                None => break,
            }
        } else {
            break;
        }
    }

    rest
}

#[derive(Debug, Default)]
struct MethodBuilder {
    name: Option<String>,
    args: Vec<Arg>,
}

impl MethodBuilder {
    fn build_method(self) -> Result<Method> {
        let name = self.name.ok_or_else(|| invalid("method without a name"))?;
        Ok(Method {
            name,
            args: self.args,
        })
    }

    fn build_signal(self) -> Result<Signal> {
        let name = self.name.ok_or_else(|| invalid("signal without a name"))?;
        Ok(Signal {
            name,
            args: self.args,
        })
    }
}

#[derive(Debug, Default)]
struct PropertyBuilder {
    name: Option<String>,
    ty: Option<Type>,
    access: Option<Access>,
}

impl PropertyBuilder {
    fn build(self) -> Result<Property> {
        let name = self.name.ok_or_else(|| invalid("property without a name"))?;
        let ty = self.ty.ok_or_else(|| invalid("property without a type"))?;
        let access = self
            .access
            .ok_or_else(|| invalid("property without an access mode"))?;

        Ok(Property { name, ty, access })
    }
}

#[derive(Debug, Default)]
struct ArgBuilder {
    name: Option<String>,
    ty: Option<Type>,
    direction: Option<Direction>,
}

impl ArgBuilder {
    fn build(self) -> Result<Arg> {
        let ty = self.ty.ok_or_else(|| invalid("argument without a type"))?;

        Ok(Arg {
            name: self.name,
            ty,
            direction: self.direction,
        })
    }
}

enum State {
    Node(Node),
    Interface(Interface),
    Method(MethodBuilder),
    Signal(MethodBuilder),
    Property(PropertyBuilder),
    Argument(ArgBuilder),
}
