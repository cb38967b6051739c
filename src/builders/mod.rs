// This file is the module declaration file for the `builders` module.
// It declares and makes public all the sub-modules within the `src/builders`
// directory. These modules turn a descriptor into the commands that back it up.

// `backends` module:
// One adapter per backup engine (rsync, tar, borg, duplicity, script). Each
// adapter turns a resolved source and its rules into a `Plan`: warnings,
// preparatory commands, the transfer command and the directories to create.
pub mod backends;

// `command` module:
// The `Command` value (argv, environment, working directory) shared by the
// adapters, the resolver and the executor, plus its verbose rendering.
pub mod command;

// `reporter` module:
// The `Reporter` trait every user-facing line passes through. The console
// implementation forwards to `tracing`; the memory implementation is used by
// tests to assert on the narrative.
pub mod reporter;

// `rules` module:
// Backend-neutral include/exclude/pattern rules and the ordered `RuleSet`
// that layers descriptor-wide rules under each source's own rules.
pub mod rules;

// `schema` module:
// The structural half of validation: a declarative description of the
// descriptor's shape, the walk that collects every violation, and the
// `Locator` that maps document paths back to line and column.
pub mod schema;

// `validator` module:
// The `DescriptorValidator` trait and `StandardValidator`, which runs the
// structural check, then the semantic checks (rule legality per backend,
// destination conflicts, remote-only options), and builds the `Descriptor`.
pub mod validator;
