mod test_compiler;
mod test_end_to_end;
mod test_gc;
mod test_lexer;
mod test_parser;
mod test_vm;
